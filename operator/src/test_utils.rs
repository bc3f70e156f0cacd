// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{
    name_registrar_controller, operator_owned_name_controller, CancelCall, CommitCall,
    CommittedFilter, EscrowedFilter, ExecuteCall, ForwardRequest, PortalKind, RentPriceCall,
    VoidCall, VoidDelayCall, VoidedFilter, COMMITMENTS_SIGNATURE,
};
use crate::chain_client::ChainClient;
use crate::chains::ChainRegistry;
use crate::config::{AcceptedCurrency, ChainSettings, NameServiceSettings};
use crate::error::{OperatorError, OperatorResult};
use crate::reconciler::Clock;
use crate::types::{
    Commitment, CommitmentStatus, DirectCall, EventBatch, EventFilter, ExecutionPayload,
    FeeParameters, ForwardedCall, RawEvent, SimulationResult, TxReceiptSummary, TxRequest,
};
use async_trait::async_trait;
use ethers::abi::{AbiDecode, AbiEncode, ParamType, Token};
use ethers::contract::{EthCall, EthEvent};
use ethers::types::{Address, Bytes, TxHash, H256, U256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub fn operator_address() -> Address {
    Address::from_low_u64_be(0x0e0e)
}

pub fn portal_address() -> Address {
    Address::from_low_u64_be(0xa0)
}

pub fn forwarder_address() -> Address {
    Address::from_low_u64_be(0xf0)
}

pub fn usd_token(chain_id: u64) -> Address {
    Address::from_low_u64_be(0xc000_0000 + chain_id)
}

/// Settings for a testnet chain accepting a 6 decimal USD token, with no
/// name-service contracts.
pub fn chain_settings(chain_id: u64, name: &str) -> ChainSettings {
    ChainSettings {
        chain_id,
        name: name.to_string(),
        rpc_url: "http://localhost:8545".to_string(),
        portal_address: portal_address(),
        portal_kind: PortalKind::Forwarded,
        forwarder_address: Some(forwarder_address()),
        num_confirmations: 1,
        mainnet: false,
        eip1559: false,
        accepted_usd: Some(AcceptedCurrency {
            address: usd_token(chain_id),
            decimals: 6,
        }),
        accepted_voucher: None,
        name_service: NameServiceSettings::default(),
    }
}

pub fn forwarded_commitment(
    origin_chain_id: u64,
    chain_id: u64,
    target: Address,
    data: Bytes,
) -> Commitment {
    let owner = Address::from_low_u64_be(0x11);
    Commitment {
        index: U256::zero(),
        owner,
        currency: Address::zero(),
        amount: U256::zero(),
        timestamp: U256::zero(),
        origin_chain_id,
        chain_id,
        payload: ExecutionPayload::Forwarded(ForwardedCall {
            request: ForwardRequest {
                from: owner,
                to: target,
                value: U256::zero(),
                gas: U256::from(300_000),
                nonce: U256::zero(),
                chain_id: U256::from(chain_id),
                data,
            },
            signature: Bytes::from(vec![0x1b; 65]),
        }),
        status: CommitmentStatus::Pending,
    }
}

/// Encodes a commitment the way a portal's `commitments(index)` returns it.
pub fn encode_commitment(commitment: &Commitment) -> Vec<u8> {
    let mut tokens = vec![
        Token::Uint(commitment.index),
        Token::Address(commitment.owner),
        Token::Address(commitment.currency),
        Token::Uint(commitment.amount),
        Token::Uint(commitment.timestamp),
        Token::Uint(U256::from(commitment.chain_id)),
    ];
    match &commitment.payload {
        ExecutionPayload::Direct(call) => tokens.extend([
            Token::Address(call.target),
            Token::Uint(call.value),
            Token::Bytes(call.data.to_vec()),
        ]),
        ExecutionPayload::Forwarded(call) => tokens.extend([
            Token::Tuple(vec![
                Token::Address(call.request.from),
                Token::Address(call.request.to),
                Token::Uint(call.request.value),
                Token::Uint(call.request.gas),
                Token::Uint(call.request.nonce),
                Token::Uint(call.request.chain_id),
                Token::Bytes(call.request.data.to_vec()),
            ]),
            Token::Bytes(call.signature.to_vec()),
        ]),
    }
    tokens.extend([
        Token::Bool(commitment.status == CommitmentStatus::Voided),
        Token::Bool(commitment.status == CommitmentStatus::Committed),
        Token::Bool(commitment.status == CommitmentStatus::Canceled),
    ]);
    ethers::abi::encode(&tokens)
}

/// `Error(string)` revert payload
pub fn encode_revert(reason: &str) -> Bytes {
    let mut data = ethers::utils::id("Error(string)").to_vec();
    data.extend(ethers::abi::encode(&[Token::String(reason.to_string())]));
    Bytes::from(data)
}

fn topic(value: U256) -> H256 {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    H256::from(bytes)
}

#[derive(Debug, Clone)]
pub struct MockClock(Arc<AtomicU64>);

impl MockClock {
    pub fn new(now: u64) -> Self {
        Self(Arc::new(AtomicU64::new(now)))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

struct MockPortal {
    void_delay: u64,
    operator: Address,
    commitments: Vec<Commitment>,
}

struct MockRegistry {
    price: U256,
    names: HashMap<String, Address>,
    reverse: HashMap<Address, String>,
}

enum MockContract {
    Portal(MockPortal),
    Forwarder,
    Registry(MockRegistry),
    /// Accepts any call
    Sink,
}

#[derive(Clone, Copy)]
struct MockReceipt {
    block_number: u64,
    success: bool,
}

#[derive(Clone, Copy)]
struct CallEnv {
    now: u64,
    tx_hash: TxHash,
}

#[derive(Default)]
struct MockChainState {
    block: u64,
    logs: Vec<(Address, RawEvent)>,
    contracts: HashMap<Address, MockContract>,
    receipts: HashMap<TxHash, MockReceipt>,
    sent: Vec<TxRequest>,
    nonce: u64,
    max_blocks_per_query: Option<u64>,
    failing_gas_targets: HashSet<Address>,
    fail_queries_from: Option<u64>,
    stall_confirmations: bool,
    query_count: usize,
}

fn selector_of(data: &[u8]) -> Result<[u8; 4], String> {
    data.get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| "calldata shorter than a selector".to_string())
}

fn decode_err(e: impl std::fmt::Display) -> String {
    format!("bad calldata: {}", e)
}

/// The single `uint256` argument of `commitments`, `commit`, `cancel` and `void`
fn index_arg(data: &[u8]) -> Result<U256, String> {
    ethers::abi::decode(&[ParamType::Uint(256)], &data[4..])
        .map_err(decode_err)?
        .pop()
        .and_then(Token::into_uint)
        .ok_or_else(|| "missing index".to_string())
}

impl MockChainState {
    fn push_log(&mut self, address: Address, topics: Vec<H256>, data: Vec<u8>, tx_hash: TxHash) {
        let event = RawEvent {
            block_number: self.block,
            tx_hash,
            log_index: self.logs.len() as u64,
            topics,
            data: Bytes::from(data),
        };
        self.logs.push((address, event));
    }

    /// Executes `data` against `to`. Nothing is mutated when the call fails or
    /// `dry_run` is set.
    fn call(
        &mut self,
        env: CallEnv,
        from: Address,
        to: Address,
        data: &[u8],
        dry_run: bool,
    ) -> Result<Vec<u8>, String> {
        let is_forwarder = matches!(self.contracts.get(&to), Some(MockContract::Forwarder));
        if is_forwarder {
            let call = ExecuteCall::decode(data).map_err(decode_err)?;
            let (success, output) =
                match self.call(env, call.req.from, call.req.to, &call.req.data, dry_run) {
                    Ok(output) => (true, output),
                    Err(reason) => (false, encode_revert(&reason).to_vec()),
                };
            return Ok(ethers::abi::encode(&[
                Token::Bool(success),
                Token::Bytes(output),
            ]));
        }

        let selector = selector_of(data)?;
        let mut emitted = Vec::new();
        let output = match self.contracts.get_mut(&to) {
            None => return Err(format!("no contract at {:?}", to)),
            Some(MockContract::Forwarder) => unreachable!(),
            Some(MockContract::Sink) => vec![],
            Some(MockContract::Portal(portal)) => {
                if selector == VoidDelayCall::selector() {
                    ethers::abi::encode(&[Token::Uint(U256::from(portal.void_delay))])
                } else if selector[..] == ethers::utils::id(COMMITMENTS_SIGNATURE)[..] {
                    let index = index_arg(data)?;
                    let commitment = portal
                        .commitments
                        .get(index.as_usize())
                        .ok_or("no such commitment")?;
                    encode_commitment(commitment)
                } else if selector == CommitCall::selector() || selector == CancelCall::selector()
                {
                    let index = index_arg(data)?;
                    if from != portal.operator {
                        return Err("caller is not the operator".to_string());
                    }
                    let commitment = portal
                        .commitments
                        .get_mut(index.as_usize())
                        .ok_or("no such commitment")?;
                    if !commitment.is_pending() {
                        return Err("commitment is not pending".to_string());
                    }
                    if !dry_run {
                        if selector == CommitCall::selector() {
                            commitment.status = CommitmentStatus::Committed;
                            emitted.push(vec![CommittedFilter::signature(), topic(index)]);
                        } else {
                            commitment.status = CommitmentStatus::Canceled;
                        }
                    }
                    vec![]
                } else if selector == VoidCall::selector() {
                    let index = index_arg(data)?;
                    let void_delay = portal.void_delay;
                    let commitment = portal
                        .commitments
                        .get_mut(index.as_usize())
                        .ok_or("no such commitment")?;
                    if from != commitment.owner {
                        return Err("caller is not the owner".to_string());
                    }
                    if !commitment.is_pending() {
                        return Err("commitment is not pending".to_string());
                    }
                    if U256::from(env.now) < commitment.timestamp + void_delay {
                        return Err("User is not allowed to void commitment yet".to_string());
                    }
                    if !dry_run {
                        commitment.status = CommitmentStatus::Voided;
                        emitted.push(vec![VoidedFilter::signature(), topic(index)]);
                    }
                    vec![]
                } else {
                    return Err("unknown portal function".to_string());
                }
            }
            Some(MockContract::Registry(registry)) => {
                let register = if selector == operator_owned_name_controller::RegisterCall::selector()
                {
                    let call = operator_owned_name_controller::RegisterCall::decode(data)
                        .map_err(decode_err)?;
                    Some((call.name, call.owner))
                } else if selector == name_registrar_controller::RegisterWithConfigCall::selector()
                {
                    let call = name_registrar_controller::RegisterWithConfigCall::decode(data)
                        .map_err(decode_err)?;
                    Some((call.name, call.owner))
                } else {
                    None
                };
                if let Some((name, owner)) = register {
                    if registry.names.contains_key(&name) {
                        return Err("name already registered".to_string());
                    }
                    if !dry_run {
                        registry.names.insert(name, owner);
                    }
                    vec![]
                } else if selector == RentPriceCall::selector() {
                    ethers::abi::encode(&[Token::Uint(registry.price)])
                } else if selector == name_registrar_controller::RenewCall::selector() {
                    let call =
                        name_registrar_controller::RenewCall::decode(data).map_err(decode_err)?;
                    if !registry.names.contains_key(&call.name) {
                        return Err("name not registered".to_string());
                    }
                    vec![]
                } else if selector == operator_owned_name_controller::SetReverseRecordCall::selector()
                {
                    let call = operator_owned_name_controller::SetReverseRecordCall::decode(data)
                        .map_err(decode_err)?;
                    if !dry_run {
                        registry.reverse.insert(call.addr, call.name);
                    }
                    vec![]
                } else if selector == operator_owned_name_controller::SetAddrCall::selector()
                    || selector == operator_owned_name_controller::SetTextCall::selector()
                {
                    vec![]
                } else {
                    return Err("unknown registry function".to_string());
                }
            }
        };
        for topics in emitted {
            self.push_log(to, topics, vec![], env.tx_hash);
        }
        Ok(output)
    }
}

/// An in-memory chain. Every transaction is mined in its own block and every
/// call runs against the latest state.
pub struct MockChain {
    chain_id: u64,
    name: String,
    clock: MockClock,
    state: Mutex<MockChainState>,
}

impl MockChain {
    pub fn new(chain_id: u64, name: &str, clock: MockClock) -> Self {
        Self {
            chain_id,
            name: name.to_string(),
            clock,
            state: Mutex::new(MockChainState::default()),
        }
    }

    fn env(&self, tx_hash: TxHash) -> CallEnv {
        CallEnv {
            now: self.clock.now(),
            tx_hash,
        }
    }

    pub fn mine_blocks(&self, n: u64) {
        self.state.lock().unwrap().block += n;
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().unwrap().block
    }

    /// Adds a log to the current block.
    pub fn emit_log(&self, address: Address, topics: Vec<H256>, data: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        let tx_hash = H256::from_low_u64_be(state.block);
        state.push_log(address, topics, data, tx_hash);
    }

    pub fn deploy_portal(&self, address: Address, void_delay: u64) {
        self.state.lock().unwrap().contracts.insert(
            address,
            MockContract::Portal(MockPortal {
                void_delay,
                operator: operator_address(),
                commitments: vec![],
            }),
        );
    }

    pub fn deploy_forwarder(&self, address: Address) {
        self.state
            .lock()
            .unwrap()
            .contracts
            .insert(address, MockContract::Forwarder);
    }

    pub fn deploy_registry(&self, address: Address, price: U256) {
        self.state.lock().unwrap().contracts.insert(
            address,
            MockContract::Registry(MockRegistry {
                price,
                names: HashMap::new(),
                reverse: HashMap::new(),
            }),
        );
    }

    pub fn deploy_sink(&self, address: Address) {
        self.state
            .lock()
            .unwrap()
            .contracts
            .insert(address, MockContract::Sink);
    }

    /// Escrows a commitment in a new block and returns its index.
    pub fn escrow(
        &self,
        portal: Address,
        owner: Address,
        currency: Address,
        amount: U256,
        destination_chain_id: u64,
        payload: ExecutionPayload,
    ) -> U256 {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        state.block += 1;
        let Some(MockContract::Portal(mock)) = state.contracts.get_mut(&portal) else {
            panic!("no portal at {:?}", portal);
        };
        let index = U256::from(mock.commitments.len());
        mock.commitments.push(Commitment {
            index,
            owner,
            currency,
            amount,
            timestamp: U256::from(now),
            origin_chain_id: self.chain_id,
            chain_id: destination_chain_id,
            payload,
            status: CommitmentStatus::Pending,
        });
        let tx_hash = H256::from_low_u64_be(state.block);
        state.push_log(
            portal,
            vec![
                EscrowedFilter::signature(),
                topic(index),
                topic(U256::from(now)),
            ],
            vec![],
            tx_hash,
        );
        index
    }

    /// Emits the `Escrowed` log of an existing commitment again.
    pub fn replay_escrow(&self, portal: Address, index: U256) {
        let timestamp = self.commitment(portal, index).timestamp;
        self.mine_blocks(1);
        self.emit_log(
            portal,
            vec![EscrowedFilter::signature(), topic(index), topic(timestamp)],
            vec![],
        );
    }

    /// Sends a transaction from an arbitrary account.
    pub fn transact_as(&self, from: Address, to: Address, data: Vec<u8>) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        state.block += 1;
        let tx_hash = H256::from_low_u64_be(state.block);
        state
            .call(self.env(tx_hash), from, to, &data, false)
            .map(|_| ())
    }

    pub fn commitment(&self, portal: Address, index: U256) -> Commitment {
        let state = self.state.lock().unwrap();
        let Some(MockContract::Portal(mock)) = state.contracts.get(&portal) else {
            panic!("no portal at {:?}", portal);
        };
        mock.commitments[index.as_usize()].clone()
    }

    pub fn registered_owner(&self, registry: Address, name: &str) -> Option<Address> {
        let state = self.state.lock().unwrap();
        let Some(MockContract::Registry(mock)) = state.contracts.get(&registry) else {
            panic!("no registry at {:?}", registry);
        };
        mock.names.get(name).copied()
    }

    pub fn register_name(&self, registry: Address, name: &str, owner: Address) {
        let mut state = self.state.lock().unwrap();
        let Some(MockContract::Registry(mock)) = state.contracts.get_mut(&registry) else {
            panic!("no registry at {:?}", registry);
        };
        mock.names.insert(name.to_string(), owner);
    }

    pub fn set_max_blocks_per_query(&self, max: Option<u64>) {
        self.state.lock().unwrap().max_blocks_per_query = max;
    }

    pub fn fail_gas_estimation_for(&self, target: Address) {
        self.state
            .lock()
            .unwrap()
            .failing_gas_targets
            .insert(target);
    }

    pub fn clear_gas_failures(&self) {
        self.state.lock().unwrap().failing_gas_targets.clear();
    }

    /// Event queries reaching `block` or later fail.
    pub fn fail_queries_from(&self, block: Option<u64>) {
        self.state.lock().unwrap().fail_queries_from = block;
    }

    pub fn stall_confirmations(&self, stall: bool) {
        self.state.lock().unwrap().stall_confirmations = stall;
    }

    pub fn query_count(&self) -> usize {
        self.state.lock().unwrap().query_count
    }

    pub fn sent_transactions(&self) -> Vec<TxRequest> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn chain_name(&self) -> &str {
        &self.name
    }

    fn signer_address(&self) -> Address {
        operator_address()
    }

    async fn current_block(&self) -> OperatorResult<u64> {
        Ok(self.block_number())
    }

    async fn query_events(
        &self,
        contract: Address,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> OperatorResult<EventBatch> {
        let mut state = self.state.lock().unwrap();
        state.query_count += 1;
        if matches!(state.fail_queries_from, Some(block) if to_block >= block) {
            return Err(OperatorError::TransientProviderError(
                "injected query failure".to_string(),
            ));
        }
        let last_block = match state.max_blocks_per_query {
            Some(max) => (from_block + max).saturating_sub(1).min(to_block),
            None => to_block,
        };
        let events = state
            .logs
            .iter()
            .filter(|(address, event)| {
                *address == contract
                    && event.block_number >= from_block
                    && event.block_number <= last_block
                    && filter.matches(event)
            })
            .map(|(_, event)| event.clone())
            .collect();
        Ok(EventBatch { events, last_block })
    }

    async fn read_state(&self, contract: Address, calldata: Bytes) -> OperatorResult<Bytes> {
        let mut state = self.state.lock().unwrap();
        state
            .call(self.env(TxHash::zero()), operator_address(), contract, &calldata, true)
            .map(Bytes::from)
            .map_err(OperatorError::ContractReverted)
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> OperatorResult<U256> {
        let mut state = self.state.lock().unwrap();
        let mut targets = vec![tx.to];
        if let Ok(call) = ExecuteCall::decode(&tx.data) {
            targets.push(call.req.to);
        }
        if targets
            .iter()
            .any(|target| state.failing_gas_targets.contains(target))
        {
            return Err(OperatorError::GasEstimationFailed(
                "execution reverted".to_string(),
            ));
        }
        state
            .call(self.env(TxHash::zero()), operator_address(), tx.to, &tx.data, true)
            .map(|_| U256::from(150_000))
            .map_err(OperatorError::GasEstimationFailed)
    }

    async fn simulate(&self, tx: &TxRequest) -> OperatorResult<SimulationResult> {
        let mut state = self.state.lock().unwrap();
        Ok(
            match state.call(self.env(TxHash::zero()), operator_address(), tx.to, &tx.data, true) {
                Ok(output) => SimulationResult {
                    success: true,
                    return_data: output.into(),
                },
                Err(reason) => SimulationResult {
                    success: false,
                    return_data: encode_revert(&reason),
                },
            },
        )
    }

    async fn send(&self, tx: &TxRequest) -> OperatorResult<TxHash> {
        let mut state = self.state.lock().unwrap();
        state.nonce += 1;
        state.block += 1;
        let tx_hash = H256::from(ethers::utils::keccak256(
            [
                self.chain_id.to_be_bytes(),
                state.nonce.to_be_bytes(),
            ]
            .concat(),
        ));
        let result = state.call(self.env(tx_hash), operator_address(), tx.to, &tx.data, false);
        let block_number = state.block;
        state.receipts.insert(
            tx_hash,
            MockReceipt {
                block_number,
                success: result.is_ok(),
            },
        );
        state.sent.push(tx.clone());
        Ok(tx_hash)
    }

    async fn await_confirmations(
        &self,
        tx_hash: TxHash,
        confirmations: u64,
    ) -> OperatorResult<TxReceiptSummary> {
        let stalled = self.state.lock().unwrap().stall_confirmations;
        if stalled {
            return futures::future::pending().await;
        }
        let mut state = self.state.lock().unwrap();
        let receipt = state
            .receipts
            .get(&tx_hash)
            .copied()
            .ok_or_else(|| OperatorError::ProviderError(format!("unknown tx {:?}", tx_hash)))?;
        let confirmed_at = receipt.block_number + confirmations.max(1) - 1;
        if state.block < confirmed_at {
            state.block = confirmed_at;
        }
        Ok(TxReceiptSummary {
            tx_hash,
            block_number: receipt.block_number,
            success: receipt.success,
        })
    }

    async fn fee_parameters(&self) -> OperatorResult<FeeParameters> {
        Ok(FeeParameters::Legacy {
            gas_price: U256::exp10(9),
        })
    }
}

/// Two chains that escrow into each other, both hosting a portal, a
/// forwarder and an operator-owned name controller quoting 5 USD.
pub struct TestBridge {
    pub clock: MockClock,
    pub origin: Arc<MockChain>,
    pub destination: Arc<MockChain>,
    pub origin_settings: ChainSettings,
    pub destination_settings: ChainSettings,
    pub chains: Arc<ChainRegistry>,
}

impl TestBridge {
    pub const ORIGIN: u64 = 43113;
    pub const DESTINATION: u64 = 44787;
    pub const VOID_DELAY: u64 = 600;

    pub fn controller() -> Address {
        Address::from_low_u64_be(0xd0)
    }

    pub fn new(kind: PortalKind) -> Self {
        let clock = MockClock::new(1_650_000_000);
        let origin = Arc::new(MockChain::new(Self::ORIGIN, "fuji", clock.clone()));
        let destination = Arc::new(MockChain::new(
            Self::DESTINATION,
            "alfajores",
            clock.clone(),
        ));
        for chain in [&origin, &destination] {
            chain.deploy_portal(portal_address(), Self::VOID_DELAY);
            chain.deploy_forwarder(forwarder_address());
            chain.deploy_registry(Self::controller(), U256::exp10(18) * 5);
        }

        let settings = |chain_id, name| {
            let mut settings = chain_settings(chain_id, name);
            settings.portal_kind = kind;
            settings.name_service.operator_owned_controller = Some(Self::controller());
            settings
        };
        let mut bridge = Self {
            clock,
            origin,
            destination,
            origin_settings: settings(Self::ORIGIN, "fuji"),
            destination_settings: settings(Self::DESTINATION, "alfajores"),
            chains: Arc::new(ChainRegistry::new()),
        };
        bridge.rebuild();
        bridge
    }

    fn rebuild(&mut self) {
        let origin: Arc<dyn ChainClient> = self.origin.clone();
        let destination: Arc<dyn ChainClient> = self.destination.clone();
        self.chains = Arc::new(
            ChainRegistry::new()
                .with_chain(self.origin_settings.clone(), origin)
                .unwrap()
                .with_chain(self.destination_settings.clone(), destination)
                .unwrap(),
        );
    }

    pub fn remove_forwarder(&mut self) {
        self.destination_settings.forwarder_address = None;
        self.rebuild();
    }

    fn register_payload(
        &self,
        settings: &ChainSettings,
        destination_chain_id: u64,
        name: &str,
        owner: Address,
    ) -> ExecutionPayload {
        let data: Bytes = operator_owned_name_controller::RegisterCall {
            name: name.to_string(),
            owner,
            duration: U256::from(31_536_000u64),
            resolver: Address::zero(),
            addr: owner,
        }
        .encode()
        .into();
        match settings.portal_kind {
            PortalKind::Direct => ExecutionPayload::Direct(DirectCall {
                target: Self::controller(),
                value: U256::zero(),
                data,
            }),
            PortalKind::Forwarded => ExecutionPayload::Forwarded(ForwardedCall {
                request: ForwardRequest {
                    from: owner,
                    to: Self::controller(),
                    value: U256::zero(),
                    gas: U256::from(300_000),
                    nonce: U256::zero(),
                    chain_id: U256::from(destination_chain_id),
                    data,
                },
                signature: Bytes::from(vec![0x1b; 65]),
            }),
        }
    }

    /// Escrows on the origin chain a registration of `name` on the destination.
    pub fn escrow_register(&self, name: &str, owner: Address, amount: u64) -> U256 {
        let payload = self.register_payload(&self.origin_settings, Self::DESTINATION, name, owner);
        self.origin.escrow(
            portal_address(),
            owner,
            usd_token(Self::ORIGIN),
            U256::from(amount),
            Self::DESTINATION,
            payload,
        )
    }

    /// Escrows on the destination chain a registration executed on the origin.
    pub fn escrow_on_destination_back_to_origin(&self, owner: Address) -> U256 {
        let payload =
            self.register_payload(&self.destination_settings, Self::ORIGIN, "reverse", owner);
        self.destination.escrow(
            portal_address(),
            owner,
            usd_token(Self::DESTINATION),
            U256::from(5_000_000u64),
            Self::ORIGIN,
            payload,
        )
    }

    pub fn origin_commitment(&self, index: U256) -> Commitment {
        self.origin.commitment(portal_address(), index)
    }

    pub fn registered_owner(&self, name: &str) -> Option<Address> {
        self.destination.registered_owner(Self::controller(), name)
    }

    /// Takes `name` on the destination outside the bridge.
    pub fn register_directly(&self, name: &str, owner: Address) {
        self.destination
            .register_name(Self::controller(), name, owner);
    }

    pub fn commit_on_origin(&self, index: U256) {
        self.origin
            .transact_as(
                operator_address(),
                portal_address(),
                CommitCall { index }.encode(),
            )
            .unwrap();
    }

    pub fn cancel_on_origin(&self, index: U256) {
        self.origin
            .transact_as(
                operator_address(),
                portal_address(),
                CancelCall { index }.encode(),
            )
            .unwrap();
    }

    pub fn void_on_origin(&self, index: U256, caller: Address) -> Result<(), String> {
        self.origin
            .transact_as(caller, portal_address(), VoidCall { index }.encode())
    }

    pub fn replay_escrow_event(&self, index: U256) {
        self.origin.replay_escrow(portal_address(), index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{decode_commitment, ExecuteReturn};

    #[tokio::test]
    async fn test_void_respects_delay() {
        let bridge = TestBridge::new(PortalKind::Forwarded);
        let owner = Address::from_low_u64_be(0xa11ce);
        let index = bridge.escrow_register("alice", owner, 5_000_000);

        assert_eq!(
            bridge.void_on_origin(index, owner),
            Err("User is not allowed to void commitment yet".to_string())
        );
        bridge.clock.advance(TestBridge::VOID_DELAY);
        assert_eq!(
            bridge.void_on_origin(index, Address::from_low_u64_be(0xbad)),
            Err("caller is not the owner".to_string())
        );
        bridge.void_on_origin(index, owner).unwrap();
        assert_eq!(
            bridge.origin_commitment(index).status,
            CommitmentStatus::Voided
        );
    }

    #[tokio::test]
    async fn test_portal_read_matches_decoder() {
        let bridge = TestBridge::new(PortalKind::Direct);
        let index = bridge.escrow_register("alice", Address::from_low_u64_be(0xa11ce), 7);
        let data = bridge
            .origin
            .read_state(portal_address(), crate::abi::commitments_calldata(index))
            .await
            .unwrap();
        let decoded = decode_commitment(PortalKind::Direct, TestBridge::ORIGIN, &data).unwrap();
        assert_eq!(decoded, bridge.origin_commitment(index));
    }

    #[tokio::test]
    async fn test_forwarder_reports_inner_failure() {
        let bridge = TestBridge::new(PortalKind::Forwarded);
        bridge.register_directly("alice", Address::from_low_u64_be(0xb0b));
        let index = bridge.escrow_register("alice", Address::from_low_u64_be(0xa11ce), 5_000_000);
        let ExecutionPayload::Forwarded(call) = bridge.origin_commitment(index).payload else {
            panic!("expected a forwarded payload");
        };
        let tx = TxRequest::call(
            forwarder_address(),
            ExecuteCall {
                req: call.request,
                signature: call.signature,
            }
            .encode(),
        );

        let simulation = bridge.destination.simulate(&tx).await.unwrap();
        assert!(simulation.success);
        let ExecuteReturn(success, data) = ExecuteReturn::decode(&simulation.return_data).unwrap();
        assert!(!success);
        assert_eq!(data, encode_revert("name already registered"));
    }

    #[tokio::test]
    async fn test_sink_accepts_anything_and_queries_can_be_capped() {
        let chain = MockChain::new(1, "sink", MockClock::new(0));
        let sink = Address::from_low_u64_be(0x51);
        chain.deploy_sink(sink);
        let hash = chain
            .send(&TxRequest::call(sink, vec![1, 2, 3, 4]))
            .await
            .unwrap();
        let receipt = chain.await_confirmations(hash, 3).await.unwrap();
        assert!(receipt.success);
        assert_eq!(chain.block_number(), 3);

        chain.set_max_blocks_per_query(Some(2));
        let batch = chain
            .query_events(sink, &EventFilter::new(H256::zero()), 0, 3)
            .await
            .unwrap();
        assert_eq!(batch.last_block, 1);
    }
}
