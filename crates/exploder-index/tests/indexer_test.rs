//! Block application and queries over a real RocksDB database.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{addr, coinbase, fast_config, hash, spend, ChainBuilder, Harness};
use exploder_core::address::Address;
use exploder_core::constants::COIN;
use exploder_core::error::{ConflictError, ExplorerError, ValidationError};
use exploder_core::types::{Hash256, SearchKind, SyncStatus, TxOutput};
use exploder_index::{IndexDb, QueryEngine};

fn apply_all(h: &Harness, chain: &ChainBuilder) {
    for block in &chain.blocks {
        h.sync.apply_block(block).unwrap();
    }
}

#[test]
fn genesis_then_child_confirmations() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    let genesis = chain.push_coinbase(50 * COIN, &x);
    let child = chain.push_coinbase(50 * COIN, &x);
    apply_all(&h, &chain);

    let latest = h.query.latest_blocks(Some("1"), None).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].height, 1);
    assert_eq!(latest[0].hash, child.hash);

    let g = genesis.hash.to_string();
    assert_eq!(h.query.block_confirmations(&g).unwrap().confirmations, 2);
    assert_eq!(
        h.query.block_confirmations(&child.hash.to_string()).unwrap().confirmations,
        1
    );

    let detail = h.query.block_by_hash(&g).unwrap();
    assert_eq!(detail.block.height, 0);
    assert_eq!(detail.nextblockhash, Some(child.hash));

    let by_height = h.query.block_by_height("1").unwrap();
    assert_eq!(by_height.block.hash, child.hash);
    assert_eq!(by_height.confirmations, 1);
    assert_eq!(by_height.nextblockhash, None);

    assert!(matches!(h.query.block_by_height("2"), Err(ExplorerError::NotFound(_))));
}

#[test]
fn spend_moves_value_between_addresses() {
    let h = Harness::new();
    let (x, y, z) = (addr(1), addr(2), addr(3));
    let cb_a = hash(0xA0, 0);
    let spend_s = hash(0x5E, 1);

    let mut chain = ChainBuilder::new();
    chain.push(vec![coinbase(cb_a, &[(50 * COIN, &x)])]);
    chain.push(vec![
        coinbase(hash(0xA0, 1), &[(50 * COIN, &z)]),
        spend(spend_s, &[(cb_a, 0)], &[(30 * COIN, &y), (20 * COIN, &x)]),
    ]);
    apply_all(&h, &chain);

    let xs = x.to_string();
    let unspent = h.query.unspent(&xs, None, None).unwrap();
    assert_eq!(unspent.len(), 1);
    assert_eq!((unspent[0].txid, unspent[0].vout), (spend_s, 1));
    assert!(!unspent.iter().any(|u| u.txid == cb_a));

    assert_eq!(h.query.balance(&xs).unwrap(), 20 * COIN);
    assert_eq!(h.query.volume(&xs).unwrap(), 70 * COIN);
    assert_eq!(h.query.balance(&y.to_string()).unwrap(), 30 * COIN);
    assert_eq!(h.query.balance(&z.to_string()).unwrap(), 50 * COIN);
    assert_eq!(h.query.transaction_count(&xs).unwrap(), 2);

    let view = h.query.address(&xs, None).unwrap();
    assert_eq!(view.sent, 50 * COIN);
    assert_eq!(view.balance, view.volume - view.sent);
    let order: Vec<Hash256> = view.transactions.iter().map(|t| t.tx.txid).collect();
    assert_eq!(order, vec![spend_s, cb_a]);
}

#[test]
fn output_with_several_owners_counts_for_each() {
    let h = Harness::new();
    let (x, y) = (addr(1), addr(2));
    let mut tx = coinbase(hash(0xA0, 0), &[]);
    tx.vout.push(TxOutput {
        value: 10,
        n: 0,
        addresses: vec![x.clone(), y.clone(), x.clone()],
    });
    let mut chain = ChainBuilder::new();
    chain.push(vec![tx]);
    apply_all(&h, &chain);

    for a in [&x, &y] {
        assert_eq!(h.query.balance(a.as_str()).unwrap(), 10);
        assert_eq!(h.query.transaction_count(a.as_str()).unwrap(), 1);
        assert_eq!(h.query.unspent(a.as_str(), None, None).unwrap().len(), 1);
    }
}

#[test]
fn segwit_owner_is_queryable_from_its_transaction() {
    let h = Harness::new();
    let owner = Address::parse("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq").unwrap();
    let mut chain = ChainBuilder::new();
    chain.push_coinbase(25 * COIN, &owner);
    apply_all(&h, &chain);

    let tx = &h.query.latest_transactions(Some("1"), None).unwrap()[0];
    let json = serde_json::to_value(tx).unwrap();
    let shown = json["vout"][0]["addresses"][0].as_str().unwrap().to_string();
    assert_eq!(shown, owner.as_str());

    assert_eq!(h.query.balance(&shown).unwrap(), 25 * COIN);
    assert_eq!(h.query.volume(&shown).unwrap(), 25 * COIN);
    assert_eq!(h.query.transaction_count(&shown).unwrap(), 1);
    assert_eq!(h.query.unspent(&shown, None, None).unwrap().len(), 1);
    assert_eq!(h.query.address(&shown, None).unwrap().transactions.len(), 1);
    assert_eq!(h.query.search(&shown).unwrap().kind, Some(SearchKind::Address));
}

#[test]
fn reapplying_committed_block_is_rejected() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    let genesis = chain.push_coinbase(50 * COIN, &x);
    let child = chain.push_coinbase(50 * COIN, &x);
    apply_all(&h, &chain);

    for block in [&genesis, &child] {
        let err = h.sync.apply_block(block).unwrap_err();
        assert!(
            matches!(err, ExplorerError::Conflict(ConflictError::DuplicateBlock(_))),
            "{err}"
        );
    }
    assert_eq!(h.query.balance(x.as_str()).unwrap(), 100 * COIN);
    assert_eq!(h.query.transaction_count(x.as_str()).unwrap(), 2);
    assert_eq!(h.query.latest_transactions(None, None).unwrap().len(), 2);
}

#[test]
fn fork_gap_and_broken_parent_are_conflicts() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    chain.push_coinbase(50 * COIN, &x);
    chain.push_coinbase(50 * COIN, &x);
    apply_all(&h, &chain);

    let mut fork = chain.blocks[1].clone();
    fork.hash = hash(0xF0, 1);
    fork.tx = vec![coinbase(hash(0xF1, 1), &[(1, &x)])];
    assert!(matches!(
        h.sync.apply_block(&fork),
        Err(ExplorerError::Conflict(ConflictError::HeightOccupied { height: 1, .. }))
    ));

    let mut gap = fork.clone();
    gap.height = 3;
    gap.previousblockhash = Some(chain.blocks[1].hash);
    assert!(matches!(
        h.sync.apply_block(&gap),
        Err(ExplorerError::Conflict(ConflictError::HeightMismatch { expected: 2, got: 3 }))
    ));

    let mut orphan = fork;
    orphan.height = 2;
    orphan.previousblockhash = Some(hash(0xEE, 0));
    assert!(matches!(
        h.sync.apply_block(&orphan),
        Err(ExplorerError::Conflict(ConflictError::ParentMismatch { .. }))
    ));

    assert_eq!(h.tip_height(), Some(1));
}

#[test]
fn genesis_with_parent_is_rejected() {
    let h = Harness::new();
    let mut chain = ChainBuilder::new();
    let mut genesis = chain.push_coinbase(1, &addr(1));
    genesis.previousblockhash = Some(hash(0xEE, 0));
    assert!(matches!(
        h.sync.apply_block(&genesis),
        Err(ExplorerError::Conflict(ConflictError::GenesisWithParent))
    ));
    assert_eq!(h.tip_height(), None);
}

#[test]
fn double_spend_rolls_back_the_whole_block() {
    let h = Harness::new();
    let (x, y, w) = (addr(1), addr(2), addr(4));
    let cb_a = hash(0xA0, 0);
    let mut chain = ChainBuilder::new();
    chain.push(vec![coinbase(cb_a, &[(50 * COIN, &x)])]);
    chain.push(vec![
        coinbase(hash(0xA0, 1), &[(50 * COIN, &x)]),
        spend(hash(0x5E, 1), &[(cb_a, 0)], &[(50 * COIN, &y)]),
    ]);
    apply_all(&h, &chain);
    let before = h.query.chain_snapshot().unwrap();

    let good = coinbase(hash(0xA0, 2), &[(50 * COIN, &w)]);
    let bad = spend(hash(0x5E, 2), &[(cb_a, 0)], &[(50 * COIN, &w)]);
    let bad_txid = bad.txid;
    chain.push(vec![good.clone(), bad]);

    let err = h.sync.apply_block(&chain.blocks[2]).unwrap_err();
    assert!(matches!(err, ExplorerError::Conflict(ConflictError::DoubleSpend(_))), "{err}");

    assert_eq!(h.query.chain_snapshot().unwrap(), before);
    assert_eq!(h.query.balance(w.as_str()).unwrap(), 0);
    assert_eq!(h.query.transaction_count(w.as_str()).unwrap(), 0);
    assert!(matches!(
        h.query.transaction(&good.txid.to_string()),
        Err(ExplorerError::NotFound(_))
    ));
    assert!(matches!(
        h.query.transaction(&bad_txid.to_string()),
        Err(ExplorerError::NotFound(_))
    ));
    assert_eq!(h.query.balance(y.as_str()).unwrap(), 50 * COIN);

    let history = h.query.sync_history(Some("1"), None).unwrap();
    assert_eq!(history[0].status, SyncStatus::Failed);
    assert_eq!(history[0].height, 1);
    assert!(history[0].error.as_deref().unwrap_or_default().contains("double-spend"));
}

#[test]
fn double_spend_within_one_block_is_caught() {
    let h = Harness::new();
    let (x, y) = (addr(1), addr(2));
    let cb_a = hash(0xA0, 0);
    let mut chain = ChainBuilder::new();
    chain.push(vec![coinbase(cb_a, &[(50 * COIN, &x)])]);
    chain.push(vec![
        coinbase(hash(0xA0, 1), &[(50 * COIN, &x)]),
        spend(hash(0x5E, 1), &[(cb_a, 0)], &[(50 * COIN, &y)]),
        spend(hash(0x5E, 2), &[(cb_a, 0)], &[(50 * COIN, &y)]),
    ]);
    h.sync.apply_block(&chain.blocks[0]).unwrap();
    assert!(matches!(
        h.sync.apply_block(&chain.blocks[1]),
        Err(ExplorerError::Conflict(ConflictError::DoubleSpend(_)))
    ));
    assert_eq!(h.query.balance(x.as_str()).unwrap(), 50 * COIN);
    assert_eq!(h.query.balance(y.as_str()).unwrap(), 0);
}

#[test]
fn unknown_input_and_malformed_tx_are_rejected() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    chain.push_coinbase(50 * COIN, &x);
    apply_all(&h, &chain);

    let mut unknown = ChainBuilder { blocks: chain.blocks.clone() };
    unknown.push(vec![
        coinbase(hash(0xA0, 1), &[(1, &x)]),
        spend(hash(0x5E, 1), &[(hash(0x99, 9), 0)], &[(1, &x)]),
    ]);
    assert!(matches!(
        h.sync.apply_block(&unknown.blocks[1]),
        Err(ExplorerError::Conflict(ConflictError::UnknownOutput(_)))
    ));

    let mut malformed = ChainBuilder { blocks: chain.blocks.clone() };
    let mut tx = coinbase(hash(0xA0, 1), &[(1, &x)]);
    tx.vout[0].n = 7;
    malformed.push(vec![tx]);
    assert!(matches!(
        h.sync.apply_block(&malformed.blocks[1]),
        Err(ExplorerError::Validation(ValidationError::MalformedTransaction { .. }))
    ));

    let mut empty = ChainBuilder { blocks: chain.blocks.clone() };
    empty.push(Vec::new());
    assert!(matches!(
        h.sync.apply_block(&empty.blocks[1]),
        Err(ExplorerError::Validation(ValidationError::MalformedBlock { .. }))
    ));
    assert_eq!(h.tip_height(), Some(0));
}

#[test]
fn pages_have_no_gap_or_overlap() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    for _ in 0..12 {
        chain.push_coinbase(COIN, &x);
    }
    apply_all(&h, &chain);

    let mut heights = Vec::new();
    for offset in ["0", "5", "10"] {
        let page = h.query.latest_blocks(Some("5"), Some(offset)).unwrap();
        assert!(page.len() <= 5);
        heights.extend(page.iter().map(|b| b.height));
    }
    assert_eq!(heights, (0..12).rev().collect::<Vec<u64>>());

    let mut seqs = Vec::new();
    for offset in ["0", "4", "8", "12"] {
        let page = h.query.latest_transactions(Some("4"), Some(offset)).unwrap();
        seqs.extend(page.iter().map(|t| t.tx.sequence));
    }
    assert_eq!(seqs, (0..12).rev().collect::<Vec<u64>>());

    let xs = x.to_string();
    let first = h.query.address(&xs, None).unwrap();
    let second = h.query.address(&xs, Some("10")).unwrap();
    assert_eq!(first.transactions.len(), 10);
    assert_eq!(second.transactions.len(), 2);
    let all: Vec<u64> = first
        .transactions
        .iter()
        .chain(&second.transactions)
        .map(|t| t.tx.height)
        .collect();
    assert_eq!(all, (0..12).rev().collect::<Vec<u64>>());

    let mut unspent_heights = Vec::new();
    for start in ["0", "5", "10"] {
        let page = h.query.unspent(&xs, Some(start), Some("5")).unwrap();
        unspent_heights.extend(page.iter().map(|u| u.height));
    }
    assert_eq!(unspent_heights, (0..12).collect::<Vec<u64>>());

    assert!(h.query.latest_blocks(Some("5"), Some("12")).unwrap().is_empty());
    assert!(h.query.latest_blocks(Some("0"), None).unwrap().is_empty());
}

#[test]
fn search_resolves_each_kind() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    let block = chain.push_coinbase(COIN, &x);
    apply_all(&h, &chain);

    let by_block = h.query.search(&block.hash.to_string()).unwrap();
    assert_eq!(by_block.kind, Some(SearchKind::Block));

    let txid = block.tx[0].txid.to_string();
    let by_tx = h.query.search(&txid).unwrap();
    assert_eq!(by_tx.search_by, txid);
    assert_eq!(by_tx.kind, Some(SearchKind::Transaction));

    assert_eq!(h.query.search(x.as_str()).unwrap().kind, Some(SearchKind::Address));
    assert_eq!(h.query.search(addr(9).as_str()).unwrap().kind, None);
    assert_eq!(h.query.search(&"00".repeat(32)).unwrap().kind, None);
    assert_eq!(h.query.search("not-a-real-id").unwrap().kind, None);
}

#[test]
fn transaction_json_carries_explorer_fields() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    let block = chain.push_coinbase(COIN, &x);
    chain.push_coinbase(COIN, &x);
    apply_all(&h, &chain);

    let txid = block.tx[0].txid.to_string();
    let json = serde_json::to_value(h.query.transaction(&txid).unwrap()).unwrap();
    assert_eq!(json["txid"], txid);
    assert_eq!(json["blockhash"], block.hash.to_string());
    assert_eq!(json["vout"][0]["addresses"][0], x.as_str());
    assert_eq!(json["confirmations"], 2);

    assert_eq!(h.query.transaction_confirmations(&txid).unwrap().confirmations, 2);
    let in_block = h.query.transactions_by_block(&block.hash.to_string()).unwrap();
    assert_eq!(in_block.len(), 1);
    assert_eq!(in_block[0].tx.txid, block.tx[0].txid);

    let block_json = serde_json::to_value(h.query.block_by_hash(&block.hash.to_string()).unwrap()).unwrap();
    assert_eq!(block_json["height"], 0);
    assert_eq!(block_json["hash"], block.hash.to_string());
    assert!(block_json.get("previousblockhash").is_none());
}

#[test]
fn sync_history_lists_commits_newest_first() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    chain.push_coinbase(COIN, &x);
    chain.push_coinbase(COIN, &x);
    chain.push_coinbase(COIN, &x);
    apply_all(&h, &chain);

    let history = h.query.sync_history(Some("2"), None).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].height, 2);
    assert_eq!(history[1].height, 1);
    assert!(history.iter().all(|r| r.status == SyncStatus::Committed));
    assert_eq!(history[0].sequence, history[1].sequence + 1);

    let tail = h.query.sync_history(Some("2"), Some("2")).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].height, 0);
}

#[test]
fn open_view_does_not_see_later_commits() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    chain.push_coinbase(COIN, &x);
    chain.push_coinbase(COIN, &x);
    h.sync.apply_block(&chain.blocks[0]).unwrap();

    let view = h.db.view().unwrap();
    h.sync.apply_block(&chain.blocks[1]).unwrap();

    assert_eq!(view.tip().map(|t| t.height), Some(0));
    assert_eq!(view.chain().tx_count, 1);
    assert_eq!(h.tip_height(), Some(1));
}

#[test]
fn committed_state_survives_reopen() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    chain.push_coinbase(COIN, &x);
    chain.push_coinbase(2 * COIN, &x);
    apply_all(&h, &chain);
    let last_sync = h.query.client_info().unwrap().last_sync;
    assert!(last_sync.is_some());
    assert!(h.sync.apply_block(&chain.blocks[1]).is_err());
    h.db.flush().unwrap();

    let path = h.dir.path().join("index");
    let Harness { db, source, sync, query, dir } = h;
    drop((query, sync, source, db));

    let db = Arc::new(IndexDb::open(&path).unwrap());
    {
        let view = db.view().unwrap();
        assert_eq!(view.tip().map(|t| t.hash), Some(chain.blocks[1].hash));
        assert_eq!(view.chain().tx_count, 2);
    }

    let query = QueryEngine::new(Arc::clone(&db), &fast_config(&dir));
    let info = query.client_info().unwrap();
    assert_eq!(info.height, Some(1));
    assert_eq!(info.last_sync, last_sync);
    drop((query, db));
    drop(dir);
}

#[test]
fn coinbase_inputs_record_no_spend() {
    let h = Harness::new();
    let x = addr(1);
    let mut chain = ChainBuilder::new();
    chain.push_coinbase(COIN, &x);
    apply_all(&h, &chain);
    let seen: HashSet<_> = h
        .query
        .unspent(x.as_str(), None, None)
        .unwrap()
        .into_iter()
        .map(|u| (u.txid, u.vout))
        .collect();
    assert_eq!(seen.len(), 1);
    assert_eq!(h.query.address(x.as_str(), None).unwrap().sent, 0);
}
