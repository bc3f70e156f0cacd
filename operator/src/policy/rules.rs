// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{Authorization, CallRule, RuleContext};
use crate::abi::RentPriceCall;
use crate::abi::RentPriceReturn;
use crate::config::AcceptedCurrency;
use crate::error::{OperatorError, OperatorResult};
use crate::types::Commitment;
use async_trait::async_trait;
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::types::{Address, U256};

/// Decimals `rentPrice` quotes are denominated in
pub const QUOTE_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Toward zero
    Down,
    /// Away from zero
    Up,
}

/// Rescales `value` from `from` to `to` decimals.
///
/// Scaling up is exact and fails on overflow. Scaling down drops the remainder
/// according to `rounding`.
pub fn shift_decimals(value: U256, from: u8, to: u8, rounding: Rounding) -> OperatorResult<U256> {
    if to >= from {
        let factor = U256::exp10((to - from) as usize);
        return value.checked_mul(factor).ok_or_else(|| {
            OperatorError::Generic(format!(
                "{} overflows when shifted from {} to {} decimals",
                value, from, to
            ))
        });
    }
    let divisor = U256::exp10((from - to) as usize);
    let (quotient, remainder) = value.div_mod(divisor);
    match rounding {
        Rounding::Up if !remainder.is_zero() => Ok(quotient + 1),
        _ => Ok(quotient),
    }
}

/// Admits any call to its target/selector pair.
pub struct AllowRule;

#[async_trait]
impl CallRule for AllowRule {
    async fn evaluate(&self, _ctx: &RuleContext<'_>) -> OperatorResult<Authorization> {
        Ok(Authorization::Allowed)
    }
}

/// Admits the call only when the address it names is the commitment owner.
pub struct OwnerMatchRule {
    decode: fn(&[u8]) -> OperatorResult<Address>,
}

impl OwnerMatchRule {
    pub fn new(decode: fn(&[u8]) -> OperatorResult<Address>) -> Self {
        Self { decode }
    }
}

#[async_trait]
impl CallRule for OwnerMatchRule {
    async fn evaluate(&self, ctx: &RuleContext<'_>) -> OperatorResult<Authorization> {
        let named = match (self.decode)(ctx.commitment.payload.calldata()) {
            Ok(address) => address,
            Err(e) => return Ok(Authorization::Rejected(format!("malformed call: {}", e))),
        };
        if named != ctx.commitment.owner {
            return Ok(Authorization::Rejected(format!(
                "call names {:?} but the commitment belongs to {:?}",
                named, ctx.commitment.owner
            )));
        }
        Ok(Authorization::Allowed)
    }
}

/// What a priced call buys, as passed to `rentPrice`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuery {
    pub name: String,
    pub duration: U256,
    pub owner: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentCurrency {
    Usd,
    Voucher,
}

impl PaymentCurrency {
    fn accepted_on(&self, ctx: &RuleContext<'_>) -> Option<AcceptedCurrency> {
        match self {
            PaymentCurrency::Usd => ctx.origin.accepted_usd,
            PaymentCurrency::Voucher => ctx.origin.accepted_voucher,
        }
    }
}

/// Admits the call when the escrow pays at least the target's live quote in
/// the currency the origin chain accepts.
pub struct PricedRule {
    currency: PaymentCurrency,
    decode: fn(&Commitment) -> OperatorResult<PriceQuery>,
    reject_self_dealing: bool,
}

impl PricedRule {
    pub fn new(
        currency: PaymentCurrency,
        decode: fn(&Commitment) -> OperatorResult<PriceQuery>,
    ) -> Self {
        Self {
            currency,
            decode,
            reject_self_dealing: false,
        }
    }

    /// Also reject calls that would hand the purchase to the operator.
    pub fn rejecting_self_dealing(mut self) -> Self {
        self.reject_self_dealing = true;
        self
    }
}

#[async_trait]
impl CallRule for PricedRule {
    async fn evaluate(&self, ctx: &RuleContext<'_>) -> OperatorResult<Authorization> {
        let commitment = ctx.commitment;
        let Some(accepted) = self.currency.accepted_on(ctx) else {
            return Ok(Authorization::Rejected(format!(
                "origin chain {} accepts no {:?} payment",
                ctx.origin.name, self.currency
            )));
        };
        if commitment.currency != accepted.address {
            return Ok(Authorization::Rejected(format!(
                "escrowed currency {:?} is not the accepted {:?}",
                commitment.currency, accepted.address
            )));
        }
        let query = match (self.decode)(commitment) {
            Ok(query) => query,
            Err(e) => return Ok(Authorization::Rejected(format!("malformed call: {}", e))),
        };
        if self.reject_self_dealing && query.owner == ctx.destination.signer_address() {
            return Ok(Authorization::Rejected(
                "call would register to the operator".to_string(),
            ));
        }

        let calldata = RentPriceCall {
            name: query.name.clone(),
            duration: query.duration,
            owner: query.owner,
        }
        .encode();
        let quote = ctx
            .destination
            .read_state(commitment.payload.target(), calldata.into())
            .await?;
        let quote = RentPriceReturn::decode(quote)?.0;
        let required = shift_decimals(quote, QUOTE_DECIMALS, accepted.decimals, Rounding::Up)?;
        if commitment.amount < required {
            return Ok(Authorization::Rejected(format!(
                "escrowed {} below the required {} for {:?}",
                commitment.amount, required, query.name
            )));
        }
        Ok(Authorization::Allowed)
    }
}
