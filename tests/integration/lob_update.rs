#![allow(missing_docs)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sombra_lob::lob::data_page::DataPage;
use sombra_lob::lob::entry::{live_entries, IndexEntry};
use sombra_lob::lob::first_page::FirstPage;
use sombra_lob::primitives::mtr::Mtr;
use sombra_lob::{
    LobDiff, LobError, LobFormat, LobOptions, LobRef, LobStore, LobUndo, PageNo, Pager,
    PagerOptions, ReadContext, Result, Stamp, TrxId, UndoKind,
};

fn open(format: LobFormat) -> Result<(Arc<Pager>, LobStore)> {
    let pager = Arc::new(Pager::new(PagerOptions::default().with_page_size(4096))?);
    let options = LobOptions::default()
        .format(format)
        .zlib_chunk_size(8 * 1024)
        .validate(true);
    let store = LobStore::new(pager.clone(), options)?;
    Ok((pager, store))
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

fn apply(model: &mut [u8], diffs: &[LobDiff]) {
    for d in diffs {
        let at = d.offset as usize;
        model[at..at + d.bytes.len()].copy_from_slice(&d.bytes);
    }
}

#[test]
fn small_change_is_applied_in_place() -> Result<()> {
    let (pager, store) = open(LobFormat::Uncompressed)?;
    let mut value = random_bytes(1, 1000);
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &value)?;
    let pages = pager.live_pages();

    let diffs = [LobDiff::new(10, *b"HELLO")];
    let outcome = store.update(&mut lob, Stamp::new(TrxId(2), 4), &diffs)?;
    apply(&mut value, &diffs);

    assert_eq!(pager.live_pages(), pages);
    assert_eq!(outcome.lob_version, 1);
    assert_eq!(outcome.undo.len(), 1);
    assert!(matches!(
        &outcome.undo[0],
        LobUndo::InPlace { chunk_offset: 10, old, .. } if old.len() == 5
    ));
    assert_eq!(store.read(&lob, 0, 1000)?, value);
    let info = store.get_info(&lob)?;
    assert_eq!(info.last_modifier, Stamp::new(TrxId(2), 4));
    assert_eq!(store.validate(&lob)?.versions, 0);
    assert!(!lob.is_being_modified());
    Ok(())
}

#[test]
fn undo_records_restore_in_place_changes() -> Result<()> {
    let (_pager, store) = open(LobFormat::Uncompressed)?;
    let original = random_bytes(2, 9_000);
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &original)?;

    // Straddles the first page and the first data page.
    let diffs = [LobDiff::new(3_395, vec![0xAA; 20]), LobDiff::new(10, vec![0xBB; 3])];
    let outcome = store.update(&mut lob, Stamp::new(TrxId(5), 2), &diffs)?;
    assert_eq!(outcome.undo.len(), 3);
    assert_ne!(store.read(&lob, 0, 9_000)?, original);

    let grown = store.append(&mut lob, Stamp::new(TrxId(5), 3), b"tail")?;
    assert_eq!(lob.length, 9_004);
    let mut records = outcome.undo;
    records.extend(grown.undo);
    assert!(matches!(records.last(), Some(LobUndo::TailGrowth { .. })));

    store.apply_undolog(&mut lob, &records)?;
    assert_eq!(lob.length, 9_000);
    assert_eq!(store.read(&lob, 0, 10_000)?, original);
    assert_eq!(store.validate(&lob)?.data_len, 9_000);
    Ok(())
}

#[test]
fn large_change_copies_chunks_and_keeps_the_old_image() -> Result<()> {
    let (pager, store) = open(LobFormat::Uncompressed)?;
    let original = random_bytes(3, 20_000);
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &original)?;
    let pages = pager.live_pages();

    let diffs = [LobDiff::new(5_000, vec![7u8; 500])];
    let outcome = store.update(&mut lob, Stamp::new(TrxId(2), 1), &diffs)?;
    assert_eq!(outcome.lob_version, 2);
    assert!(outcome.undo.is_empty());
    assert!(pager.live_pages() > pages);

    let mut expected = original.clone();
    apply(&mut expected, &diffs);
    assert_eq!(store.read(&lob, 0, 20_000)?, expected);
    assert_eq!(store.read_at(&lob, ReadContext::at(1), 0, 20_000)?, original);
    assert_eq!(store.get_info(&lob)?.lob_version, 2);
    assert!(store.validate(&lob)?.versions >= 1);
    Ok(())
}

#[test]
fn replace_is_always_copy_on_write() -> Result<()> {
    for format in [LobFormat::Uncompressed, LobFormat::Compressed] {
        let (_pager, store) = open(format)?;
        let original = random_bytes(4, 12_000);
        let mut lob = store.insert(Stamp::new(TrxId(1), 1), &original)?;
        let outcome = store.replace(&mut lob, Stamp::new(TrxId(2), 1), 100, b"xy")?;
        assert_eq!(outcome.lob_version, 2);
        assert!(outcome.undo.is_empty());

        let mut expected = original.clone();
        expected[100..102].copy_from_slice(b"xy");
        assert_eq!(store.read(&lob, 0, 12_000)?, expected, "{format:?}");
        assert_eq!(store.read_at(&lob, ReadContext::at(1), 0, 12_000)?, original);
    }
    Ok(())
}

#[test]
fn compressed_updates_rewrite_touched_chunks() -> Result<()> {
    let (_pager, store) = open(LobFormat::Compressed)?;
    let mut model: Vec<u8> = b"0123456789abcdef".iter().copied().cycle().take(40_000).collect();
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &model)?;
    let mut rng = StdRng::seed_from_u64(99);
    for round in 0..12u32 {
        let len = rng.gen_range(1..600);
        let offset = rng.gen_range(0..model.len() - len) as u64;
        let diffs = [LobDiff::new(offset, random_bytes(round as u64, len))];
        let outcome = store.update(&mut lob, Stamp::new(TrxId(2), round), &diffs)?;
        assert_eq!(outcome.lob_version, round + 2);
        apply(&mut model, &diffs);
        assert_eq!(store.read(&lob, 0, model.len())?, model);
    }
    Ok(())
}

#[test]
fn append_grows_both_formats() -> Result<()> {
    for format in [LobFormat::Uncompressed, LobFormat::Compressed] {
        let (_pager, store) = open(format)?;
        let mut model = random_bytes(6, 3_000);
        let mut lob = store.insert(Stamp::new(TrxId(1), 1), &model)?;
        for round in 0..6u32 {
            let extra = random_bytes(100 + round as u64, 2_500 * (round as usize + 1));
            store.append(&mut lob, Stamp::new(TrxId(3), round), &extra)?;
            model.extend_from_slice(&extra);
            assert_eq!(lob.length as usize, model.len());
            assert_eq!(store.read(&lob, 0, model.len())?, model, "{format:?} round {round}");
        }
        assert_eq!(store.validate(&lob)?.data_len, model.len() as u64);
    }
    Ok(())
}

#[test]
fn diffs_past_the_end_are_rejected() -> Result<()> {
    for format in [LobFormat::Uncompressed, LobFormat::Compressed] {
        let (_pager, store) = open(format)?;
        let mut lob = store.insert(Stamp::new(TrxId(1), 1), &[1u8; 100])?;
        let err = store
            .update(&mut lob, Stamp::new(TrxId(2), 1), &[LobDiff::new(95, vec![0; 10])])
            .unwrap_err();
        assert!(matches!(err, LobError::Invalid(_)));
        assert!(!lob.is_being_modified());
        assert_eq!(store.read(&lob, 0, 100)?, vec![1u8; 100]);
    }
    Ok(())
}

#[test]
fn not_partially_updatable_lobs_refuse_updates() -> Result<()> {
    let (_pager, store) = open(LobFormat::Uncompressed)?;
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &[3u8; 500])?;
    store.mark_not_partially_updatable(&lob)?;
    assert!(!store.get_info(&lob)?.partially_updatable);
    let err = store
        .update(&mut lob, Stamp::new(TrxId(2), 1), &[LobDiff::new(0, vec![9])])
        .unwrap_err();
    assert!(matches!(err, LobError::Invalid(_)));
    assert!(store.append(&mut lob, Stamp::new(TrxId(2), 2), b"x").is_err());
    Ok(())
}

#[test]
fn compressed_lobs_have_no_undo_records() -> Result<()> {
    let (_pager, store) = open(LobFormat::Compressed)?;
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &[5u8; 2_000])?;
    let outcome = store.update(&mut lob, Stamp::new(TrxId(2), 1), &[LobDiff::new(3, vec![1])])?;
    assert!(outcome.undo.is_empty());
    store.apply_undolog(&mut lob, &[])?;
    Ok(())
}

/// Bytes past the first page, gathered by following next-page links from
/// the first data page.
fn chained_bytes(pager: &Pager, lob: &LobRef) -> Result<Vec<u8>> {
    let mut mtr = Mtr::start(pager);
    let first = FirstPage(lob.page_no);
    let mut page = PageNo::NULL;
    for entry in live_entries(&mut mtr, first)? {
        let at = entry.location(&mut mtr)?;
        if at != first.0 {
            page = at;
            break;
        }
    }
    let mut out = Vec::new();
    while !page.is_null() {
        let data = DataPage(page);
        let mut chunk = vec![0u8; data.data_len(&mut mtr)? as usize];
        data.read(&mut mtr, 0, &mut chunk)?;
        out.extend_from_slice(&chunk);
        page = data.next(&mut mtr)?;
    }
    mtr.commit()?;
    Ok(out)
}

#[test]
fn data_pages_chain_in_index_order() -> Result<()> {
    let (pager, store) = open(LobFormat::Uncompressed)?;
    let inline = FirstPage::data_capacity(4096);
    let original = random_bytes(40, 20_000);
    let mut lob = store.insert(Stamp::new(TrxId(1), 1), &original)?;
    assert_eq!(chained_bytes(&pager, &lob)?, original[inline..]);

    let mut model = original.clone();
    let patch = vec![0xAB; 6_000];
    store.replace(&mut lob, Stamp::new(TrxId(2), 1), 8_000, &patch)?;
    model[8_000..14_000].copy_from_slice(&patch);
    assert_eq!(chained_bytes(&pager, &lob)?, model[inline..]);

    store.rollback(&mut lob, TrxId(2), 1, UndoKind::UpdateExisting, None)?;
    assert_eq!(chained_bytes(&pager, &lob)?, original[inline..]);

    let tail = random_bytes(41, 9_000);
    store.append(&mut lob, Stamp::new(TrxId(3), 1), &tail)?;
    let mut model = original;
    model.extend_from_slice(&tail);
    assert_eq!(chained_bytes(&pager, &lob)?, model[inline..]);
    store.validate(&lob)?;
    Ok(())
}
