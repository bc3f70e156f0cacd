// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Decides which commitments the operator is willing to execute.
//!
//! Every destination chain gets an [`AuthorizationPolicy`]: a table from
//! `(target address, function selector)` to a [`CallRule`]. Calls without an
//! entry are rejected. Rules are evaluated on every attempt because prices and
//! ownership change on chain.

mod rules;

pub use rules::{
    shift_decimals, AllowRule, OwnerMatchRule, PaymentCurrency, PriceQuery, PricedRule, Rounding,
    QUOTE_DECIMALS,
};

use crate::abi::{
    base_registrar, name_registrar_controller, operator_owned_name_controller, public_resolver,
    reverse_registrar,
};
use crate::chain_client::ChainClient;
use crate::config::ChainSettings;
use crate::error::OperatorResult;
use crate::types::{Commitment, Selector};
use async_trait::async_trait;
use ethers::abi::AbiDecode;
use ethers::contract::EthCall;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Rejected(String),
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Authorization::Allowed)
    }
}

/// Inputs available to a rule while judging one commitment.
pub struct RuleContext<'a> {
    pub commitment: &'a Commitment,
    /// Settings of the chain the commitment was escrowed on
    pub origin: &'a ChainSettings,
    /// Client of the chain the call would execute on
    pub destination: &'a dyn ChainClient,
}

#[async_trait]
pub trait CallRule: Send + Sync {
    /// Errors are reserved for failures to reach the chain; a call that should
    /// not run is `Ok(Authorization::Rejected(..))`.
    async fn evaluate(&self, ctx: &RuleContext<'_>) -> OperatorResult<Authorization>;
}

#[derive(Clone, Default)]
pub struct AuthorizationPolicy {
    mainnet: bool,
    rules: HashMap<(Address, Selector), Arc<dyn CallRule>>,
}

impl AuthorizationPolicy {
    pub fn new(mainnet: bool) -> Self {
        Self {
            mainnet,
            rules: HashMap::new(),
        }
    }

    pub fn register(&mut self, target: Address, selector: Selector, rule: Arc<dyn CallRule>) {
        self.rules.insert((target, selector), rule);
    }

    pub fn with_rule(
        mut self,
        target: Address,
        selector: Selector,
        rule: impl CallRule + 'static,
    ) -> Self {
        self.register(target, selector, Arc::new(rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn has_rule(&self, target: Address, selector: Selector) -> bool {
        self.rules.contains_key(&(target, selector))
    }

    pub async fn authorize(
        &self,
        commitment: &Commitment,
        origin: &ChainSettings,
        destination: &dyn ChainClient,
    ) -> OperatorResult<Authorization> {
        if self.mainnet && !origin.mainnet {
            return Ok(Authorization::Rejected(format!(
                "mainnet destination does not accept escrows from {}",
                origin.name
            )));
        }
        let target = commitment.payload.target();
        let Some(selector) = commitment.payload.selector() else {
            return Ok(Authorization::Rejected(
                "calldata is shorter than a selector".to_string(),
            ));
        };
        let Some(rule) = self.rules.get(&(target, selector)) else {
            return Ok(Authorization::Rejected(format!(
                "no rule for {:?} selector 0x{}",
                target,
                ethers::utils::hex::encode(selector)
            )));
        };
        rule.evaluate(&RuleContext {
            commitment,
            origin,
            destination,
        })
        .await
    }

    pub async fn is_authorized(
        &self,
        commitment: &Commitment,
        origin: &ChainSettings,
        destination: &dyn ChainClient,
    ) -> OperatorResult<bool> {
        Ok(self
            .authorize(commitment, origin, destination)
            .await?
            .is_allowed())
    }
}

fn register_with_config_query(commitment: &Commitment) -> OperatorResult<PriceQuery> {
    let call =
        name_registrar_controller::RegisterWithConfigCall::decode(commitment.payload.calldata())?;
    Ok(PriceQuery {
        name: call.name,
        duration: call.duration,
        owner: call.owner,
    })
}

fn renew_query(commitment: &Commitment) -> OperatorResult<PriceQuery> {
    let call = name_registrar_controller::RenewCall::decode(commitment.payload.calldata())?;
    Ok(PriceQuery {
        name: call.name,
        duration: call.duration,
        owner: commitment.owner,
    })
}

fn operator_owned_register_query(commitment: &Commitment) -> OperatorResult<PriceQuery> {
    let call = operator_owned_name_controller::RegisterCall::decode(commitment.payload.calldata())?;
    Ok(PriceQuery {
        name: call.name,
        duration: call.duration,
        owner: call.owner,
    })
}

fn reverse_record_address(data: &[u8]) -> OperatorResult<Address> {
    Ok(operator_owned_name_controller::SetReverseRecordCall::decode(data)?.addr)
}

/// Builds the rule table for calls executed on `destination`.
pub fn build_policy(destination: &ChainSettings) -> AuthorizationPolicy {
    let mut policy = AuthorizationPolicy::new(destination.mainnet);
    let names = &destination.name_service;

    if let Some(resolver) = names.resolver {
        policy = policy
            .with_rule(resolver, public_resolver::SetTextCall::selector(), AllowRule)
            .with_rule(resolver, public_resolver::SetAddrCall::selector(), AllowRule);
    }
    if let Some(reverse) = names.reverse_registrar {
        policy = policy.with_rule(reverse, reverse_registrar::SetNameCall::selector(), AllowRule);
    }
    if let Some(base) = names.base_registrar {
        policy = policy
            .with_rule(
                base,
                base_registrar::SafeTransferFromCall::selector(),
                AllowRule,
            )
            .with_rule(base, base_registrar::ReclaimCall::selector(), AllowRule);
    }
    if let Some(controller) = names.registrar_controller {
        policy = policy
            .with_rule(
                controller,
                name_registrar_controller::RegisterWithConfigCall::selector(),
                PricedRule::new(PaymentCurrency::Usd, register_with_config_query),
            )
            .with_rule(
                controller,
                name_registrar_controller::RenewCall::selector(),
                PricedRule::new(PaymentCurrency::Usd, renew_query),
            );
    }
    if let Some(voucher) = names.voucher_registrar {
        policy = policy.with_rule(
            voucher,
            name_registrar_controller::RegisterWithConfigCall::selector(),
            PricedRule::new(PaymentCurrency::Voucher, register_with_config_query),
        );
    }
    if let Some(controller) = names.operator_owned_controller {
        policy = policy
            .with_rule(
                controller,
                operator_owned_name_controller::RegisterCall::selector(),
                PricedRule::new(PaymentCurrency::Usd, operator_owned_register_query)
                    .rejecting_self_dealing(),
            )
            .with_rule(
                controller,
                operator_owned_name_controller::SetAddrCall::selector(),
                AllowRule,
            )
            .with_rule(
                controller,
                operator_owned_name_controller::SetTextCall::selector(),
                AllowRule,
            )
            .with_rule(
                controller,
                operator_owned_name_controller::SetReverseRecordCall::selector(),
                OwnerMatchRule::new(reverse_record_address),
            );
    }

    info!(
        "[{}] Authorization policy has {} rules (mainnet: {})",
        destination.name,
        policy.len(),
        destination.mainnet
    );
    policy
}
