//! End-to-end integration tests for the blobchain protocol.
//!
//! Each test drives a real `Vm` over a sled database the way a consensus
//! host would: submit, build, accept, and then inspect durable state
//! through the client service.

use std::sync::Arc;

use blobchain_protocol::chain::{
    BaseTx, ChainVm, CustomAllocation, Genesis, SetTx, Transaction, TransferTx,
    UnsignedTransaction,
};
use blobchain_protocol::config::VmConfig;
use blobchain_protocol::crypto::{keccak256, value_hash, Keypair};
use blobchain_protocol::storage::{keys, state, Database, LinkedValueCache, SledDatabase};
use blobchain_protocol::types::{Address, ContentKey};
use blobchain_protocol::vm::{service::verify_resolved, ChainService, NoopTrigger, Vm};
use blobchain_protocol::ChainError;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const MAGIC: u64 = 0x5eed;
const FUNDS: u64 = 10_000_000;

fn genesis(funded: &[&Keypair]) -> Genesis {
    let mut g = Genesis::default_with_magic(MAGIC);
    g.max_value_size = 200 * 1024;
    g.min_price = 1;
    g.custom_allocation = funded
        .iter()
        .map(|k| CustomAllocation {
            address: k.address(),
            balance: FUNDS,
        })
        .collect();
    g
}

fn start(g: Genesis) -> (Arc<Vm>, ChainService) {
    let db: Arc<dyn Database> = Arc::new(SledDatabase::open_temporary().expect("temp db"));
    let vm = Vm::new(g, VmConfig::default(), db, &[], Arc::new(NoopTrigger)).expect("vm");
    let service = ChainService::new(Arc::clone(&vm));
    (vm, service)
}

fn base(vm: &Vm, price: u64) -> BaseTx {
    BaseTx {
        magic: MAGIC,
        block_id: vm.preferred(),
        price,
    }
}

fn set_tx(vm: &Vm, key: &Keypair, value: &[u8]) -> Transaction {
    let utx = UnsignedTransaction::Set(SetTx {
        base: base(vm, 1),
        value: value.to_vec(),
    });
    Transaction::sign(utx, key).expect("sign")
}

fn transfer_tx(vm: &Vm, key: &Keypair, to: Address, units: u64, price: u64) -> Transaction {
    let utx = UnsignedTransaction::Transfer(TransferTx {
        base: base(vm, price),
        to,
        units,
    });
    Transaction::sign(utx, key).expect("sign")
}

/// Builds on the preferred block at `timestamp` and accepts.
fn produce(vm: &Arc<Vm>, timestamp: u64) {
    let block = vm.build_block_at(timestamp).expect("build");
    block.accept().expect("accept");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn blob_store_and_transfer_scenario() {
    let alice = Keypair::from_seed(&[1; 32]);
    let bob = Keypair::from_seed(&[2; 32]);
    let (vm, service) = start(genesis(&[&alice, &bob]));

    // 1 KiB value, stored under its keccak256.
    let value: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    let tx_id = service.issue_raw_tx(set_tx(&vm, &alice, &value).bytes()).unwrap();
    produce(&vm, 100);

    let key = ContentKey::from(keccak256(&value));
    let resolved = service.resolve(&key).unwrap().expect("stored");
    assert_eq!(resolved.value, value);
    assert_eq!(resolved.meta.tx_id, tx_id);
    assert_eq!(resolved.meta.size, 1024);
    verify_resolved(&key, &resolved.value).unwrap();

    // Same value from another signer: write-once.
    let dup = set_tx(&vm, &bob, &value);
    assert!(matches!(vm.submit(dup), Err(ChainError::KeyExists(k)) if k == key));
    assert_eq!(service.resolve(&key).unwrap().unwrap().meta.tx_id, tx_id);

    // Transfer to a fresh address.
    let fresh = Address([0x77; 20]);
    vm.submit(transfer_tx(&vm, &alice, fresh, 100, 1)).unwrap();
    produce(&vm, 101);
    assert_eq!(service.balance(&fresh).unwrap(), 100);
    assert!(service.has_tx(&tx_id).unwrap());
    assert_eq!(service.last_accepted().height, 2);
}

#[test]
fn racing_identical_values_keep_the_first() {
    let alice = Keypair::from_seed(&[1; 32]);
    let bob = Keypair::from_seed(&[2; 32]);
    let (vm, service) = start(genesis(&[&alice, &bob]));

    let first = vm.submit(set_tx(&vm, &alice, b"contested")).unwrap();
    vm.submit(set_tx(&vm, &bob, b"contested")).unwrap();
    assert_eq!(vm.mempool().len(), 2);

    let block = vm.build_block_at(100).unwrap();
    assert_eq!(block.transactions().len(), 1);
    block.accept().unwrap();

    let meta = service.resolve(&value_hash(b"contested")).unwrap().unwrap().meta;
    assert_eq!(meta.tx_id, first);
    // The loser was dropped at build time and never charged.
    assert_eq!(service.balance(&bob.address()).unwrap(), FUNDS);
}

#[test]
fn transfers_conserve_balance() {
    let alice = Keypair::from_seed(&[1; 32]);
    let bob = Keypair::from_seed(&[2; 32]);
    let (vm, service) = start(genesis(&[&alice, &bob]));

    let tx = transfer_tx(&vm, &alice, bob.address(), 5_000, 1);
    let fee = tx.fee_units(vm.genesis()) * tx.price();
    vm.submit(tx).unwrap();
    produce(&vm, 100);

    let a = service.balance(&alice.address()).unwrap();
    let b = service.balance(&bob.address()).unwrap();
    assert_eq!(a, FUNDS - 5_000 - fee);
    assert_eq!(b, FUNDS + 5_000);
    assert_eq!(a + b + fee, 2 * FUNDS);

    // Over-balance: rejected up front, nothing moves.
    let too_much = transfer_tx(&vm, &alice, bob.address(), FUNDS, 1);
    assert!(matches!(vm.submit(too_much), Err(ChainError::InvalidBalance { .. })));
    assert_eq!(service.balance(&alice.address()).unwrap(), a);
    assert_eq!(service.balance(&bob.address()).unwrap(), b);
}

#[test]
fn stored_blocks_round_trip_through_linking() {
    let alice = Keypair::from_seed(&[1; 32]);
    let (vm, _service) = start(genesis(&[&alice]));

    let value = vec![0xaa; 3000];
    vm.submit(set_tx(&vm, &alice, &value)).unwrap();
    let built = vm.build_block_at(100).unwrap();
    built.accept().unwrap();

    // The stored body carries a pointer, not the value.
    let raw = vm.state().get(&keys::block_key(&built.id())).unwrap().unwrap();
    assert!(raw.len() < value.len());

    let cache = LinkedValueCache::new(4);
    let restored = state::get_block(&*vm.state(), &built.id(), &cache).unwrap().unwrap();
    match restored.txs[0].unsigned() {
        UnsignedTransaction::Set(set) => assert_eq!(set.value, value),
        other => panic!("unexpected tx {other:?}"),
    }
    assert_eq!(cache.len(), 1);

    let reloaded = vm.get_block(&built.id()).unwrap();
    assert_eq!(reloaded.bytes(), built.bytes());
}

#[test]
fn fee_market_reacts_to_load() {
    let alice = Keypair::from_seed(&[1; 32]);
    let bob = Keypair::from_seed(&[2; 32]);
    let mut g = genesis(&[&alice]);
    // Window target: 1 unit/block * 60 s / 1 s = 60 units.
    g.target_block_size = 1;
    let (vm, service) = start(g);

    for units in 1..=70 {
        vm.submit(transfer_tx(&vm, &alice, bob.address(), units, 1)).unwrap();
    }
    let block = vm.build_block_at(100).unwrap();
    assert_eq!(block.transactions().len(), 70);
    block.accept().unwrap();

    let fee = service.suggested_raw_fee().unwrap();
    assert_eq!(fee.price, 2);

    let cheap = transfer_tx(&vm, &alice, bob.address(), 1_000, 1);
    assert!(matches!(
        vm.submit(cheap),
        Err(ChainError::InsufficientPrice { required: 2, offered: 1 })
    ));

    vm.submit(transfer_tx(&vm, &alice, bob.address(), 1_000, 2)).unwrap();
    let next = vm.build_block_at(101).unwrap();
    assert_eq!(next.block().price(), 2);
    next.accept().unwrap();
}

#[test]
fn airdrop_genesis_funds_recipients() {
    let alice = Keypair::from_seed(&[1; 32]);
    let airdrop = format!(r#"[{{"address":"{}"}}]"#, alice.address());
    let mut g = Genesis::default_with_magic(MAGIC);
    g.airdrop_hash = format!("0x{}", hex::encode(keccak256(airdrop.as_bytes())));
    g.airdrop_units = 1_234;

    let db: Arc<dyn Database> = Arc::new(SledDatabase::open_temporary().unwrap());
    let vm = Vm::new(g.clone(), VmConfig::default(), db, airdrop.as_bytes(), Arc::new(NoopTrigger))
        .unwrap();
    assert_eq!(ChainService::new(vm).balance(&alice.address()).unwrap(), 1_234);

    let db: Arc<dyn Database> = Arc::new(SledDatabase::open_temporary().unwrap());
    let result = Vm::new(g, VmConfig::default(), db, b"[]", Arc::new(NoopTrigger));
    assert!(matches!(result, Err(ChainError::AirdropMismatch { .. })));
}

#[test]
fn stale_block_references_are_refused() {
    let alice = Keypair::from_seed(&[1; 32]);
    let (vm, _service) = start(genesis(&[&alice]));
    let genesis_id = vm.last_accepted();

    vm.submit(set_tx(&vm, &alice, b"moves the tip")).unwrap();
    produce(&vm, 100);

    // Genesis (t=0) is outside the 60 s window of any block after t=100.
    let utx = UnsignedTransaction::Set(SetTx {
        base: BaseTx {
            magic: MAGIC,
            block_id: genesis_id,
            price: 1,
        },
        value: b"too late".to_vec(),
    });
    let stale = Transaction::sign(utx, &alice).unwrap();
    assert!(matches!(vm.submit(stale), Err(ChainError::InvalidBlockId(id)) if id == genesis_id));
}
