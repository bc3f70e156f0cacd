// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(ambiguous_glob_reexports)]

use crate::error::{OperatorError, OperatorResult};
use crate::types::{Commitment, CommitmentStatus, DirectCall, ExecutionPayload, ForwardedCall};
use ethers::abi::{ParamType, Token};
use ethers::contract::abigen;
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

abigen!(
    ReservePortal,
    r#"[
        event Escrowed(uint256 indexed index, uint256 indexed timestamp)
        event Committed(uint256 indexed index)
        event Voided(uint256 indexed index)
        function voidDelay() external view returns (uint256)
        function commit(uint256 index) external
        function cancel(uint256 index) external
        function void(uint256 index) external
    ]"#,
);

abigen!(
    MinimalForwarder,
    r#"[
        struct ForwardRequest { address from; address to; uint256 value; uint256 gas; uint256 nonce; uint256 chainId; bytes data; }
        function getNonce(address from) external view returns (uint256)
        function execute(ForwardRequest req, bytes signature) external payable returns (bool, bytes)
    ]"#,
);

abigen!(
    NameRegistrarController,
    r#"[
        function registerWithConfig(string name, address owner, uint256 duration, address resolver, address addr) external
        function renew(string name, uint256 duration) external
        function rentPrice(string name, uint256 duration, address owner) external view returns (uint256)
    ]"#,
);

abigen!(
    OperatorOwnedNameController,
    r#"[
        function register(string name, address owner, uint256 duration, address resolver, address addr) external
        function setAddr(string name, address addr) external
        function setText(string name, string key, string value) external
        function setReverseRecord(address addr, string name) external
    ]"#,
);

abigen!(
    PublicResolver,
    r#"[
        function setText(bytes32 node, string key, string value) external
        function setAddr(bytes32 node, address a) external
    ]"#,
);

abigen!(
    ReverseRegistrar,
    r#"[
        function setName(string name) external returns (bytes32)
    ]"#,
);

abigen!(
    BaseRegistrar,
    r#"[
        function safeTransferFrom(address from, address to, uint256 tokenId) external
        function reclaim(uint256 id, address owner) external
    ]"#,
);

pub const COMMITMENTS_SIGNATURE: &str = "commitments(uint256)";

/// Which `commitments(index)` layout an origin portal exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortalKind {
    /// `(.., address target, uint256 value, bytes data, ..)`
    Direct,
    /// `(.., ForwardRequest request, bytes signature, ..)`
    #[default]
    Forwarded,
}

pub fn commitments_calldata(index: U256) -> Bytes {
    let mut data = ethers::utils::id(COMMITMENTS_SIGNATURE).to_vec();
    data.extend(ethers::abi::encode(&[Token::Uint(index)]));
    Bytes::from(data)
}

fn forward_request_param() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Bytes,
    ])
}

pub fn commitment_params(kind: PortalKind) -> Vec<ParamType> {
    let mut params = vec![
        ParamType::Uint(256), // index
        ParamType::Address,   // owner
        ParamType::Address,   // currency
        ParamType::Uint(256), // amount
        ParamType::Uint(256), // timestamp
        ParamType::Uint(256), // destination chain id
    ];
    match kind {
        PortalKind::Direct => {
            params.extend([ParamType::Address, ParamType::Uint(256), ParamType::Bytes])
        }
        PortalKind::Forwarded => params.extend([forward_request_param(), ParamType::Bytes]),
    }
    params.extend([ParamType::Bool, ParamType::Bool, ParamType::Bool]);
    params
}

/// Decodes the return data of `commitments(index)` into a snapshot tagged with its origin.
pub fn decode_commitment(
    kind: PortalKind,
    origin_chain_id: u64,
    data: &[u8],
) -> OperatorResult<Commitment> {
    let mut tokens = ethers::abi::decode(&commitment_params(kind), data)?.into_iter();
    let mut next = || {
        tokens
            .next()
            .ok_or_else(|| OperatorError::DecodeError("commitment tuple too short".to_string()))
    };

    let index = uint(next()?)?;
    let owner = address(next()?)?;
    let currency = address(next()?)?;
    let amount = uint(next()?)?;
    let timestamp = uint(next()?)?;
    let chain_id = uint(next()?)?;
    let payload = match kind {
        PortalKind::Direct => ExecutionPayload::Direct(DirectCall {
            target: address(next()?)?,
            value: uint(next()?)?,
            data: bytes(next()?)?,
        }),
        PortalKind::Forwarded => {
            let request = decode_forward_request(next()?)?;
            ExecutionPayload::Forwarded(ForwardedCall {
                request,
                signature: bytes(next()?)?,
            })
        }
    };
    let voided = boolean(next()?)?;
    let committed = boolean(next()?)?;
    let canceled = boolean(next()?)?;

    if chain_id > U256::from(u64::MAX) {
        return Err(OperatorError::DecodeError(format!(
            "commitment {} has out of range chain id {}",
            index, chain_id
        )));
    }

    Ok(Commitment {
        index,
        owner,
        currency,
        amount,
        timestamp,
        origin_chain_id,
        chain_id: chain_id.as_u64(),
        payload,
        status: CommitmentStatus::from_flags(voided, committed, canceled)?,
    })
}

fn decode_forward_request(token: Token) -> OperatorResult<ForwardRequest> {
    let fields = token
        .into_tuple()
        .ok_or_else(|| OperatorError::DecodeError("request is not a tuple".to_string()))?;
    let [from, to, value, gas, nonce, chain_id, data]: [Token; 7] =
        fields.try_into().map_err(|fields: Vec<Token>| {
            OperatorError::DecodeError(format!("request has {} fields", fields.len()))
        })?;
    Ok(ForwardRequest {
        from: address(from)?,
        to: address(to)?,
        value: uint(value)?,
        gas: uint(gas)?,
        nonce: uint(nonce)?,
        chain_id: uint(chain_id)?,
        data: bytes(data)?,
    })
}

fn uint(token: Token) -> OperatorResult<U256> {
    token
        .into_uint()
        .ok_or_else(|| OperatorError::DecodeError("expected uint256".to_string()))
}

fn address(token: Token) -> OperatorResult<Address> {
    token
        .into_address()
        .ok_or_else(|| OperatorError::DecodeError("expected address".to_string()))
}

fn bytes(token: Token) -> OperatorResult<Bytes> {
    token
        .into_bytes()
        .map(Bytes::from)
        .ok_or_else(|| OperatorError::DecodeError("expected bytes".to_string()))
}

fn boolean(token: Token) -> OperatorResult<bool> {
    token
        .into_bool()
        .ok_or_else(|| OperatorError::DecodeError("expected bool".to_string()))
}
