#![allow(missing_docs)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sombra_lob::{
    lob::BulkLoaderStats, types::page::PAGE_HDR_LEN, LobDiff, LobError, LobOptions, LobStore,
    PageNo, PageStore, Pager, PagerOptions, Result, Stamp, TrxId,
};

fn open(max_pages: Option<u32>) -> Result<(Arc<Pager>, LobStore)> {
    let mut options = PagerOptions::default().with_page_size(4096);
    if let Some(max) = max_pages {
        options = options.with_max_pages(max);
    }
    let pager = Arc::new(Pager::new(options)?);
    let store = LobStore::new(pager.clone(), LobOptions::default().validate(true))?;
    Ok((pager, store))
}

fn values() -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(21);
    [0usize, 17, 3_402, 3_403, 25_000, 70_001]
        .into_iter()
        .map(|len| (0..len).map(|_| rng.gen()).collect())
        .collect()
}

#[test]
fn bulk_pages_match_the_logged_insert_path() -> Result<()> {
    let (logged_pager, logged) = open(None)?;
    let (bulk_pager, bulk) = open(None)?;
    let stamp = Stamp::new(TrxId(12), 3);

    let mut loader = bulk.bulk_loader();
    for value in values() {
        let a = logged.insert(stamp, &value)?;
        let b = loader.insert(stamp, &value)?;
        assert_eq!(a.page_no, b.page_no);
        assert_eq!(a.length, b.length);
    }
    let stats = loader.stats();
    drop(loader);

    let high_water = logged_pager.stats().high_water;
    assert_eq!(bulk_pager.stats().high_water, high_water);
    assert_eq!(stats.pages_published, logged_pager.live_pages());
    for page in (0..high_water).map(PageNo) {
        let expected = logged_pager.page_image(page)?;
        let actual = bulk_pager.page_image(page)?;
        assert_eq!(&expected[PAGE_HDR_LEN..], &actual[PAGE_HDR_LEN..], "page {page}");
        bulk_pager.verify_page(page)?;
    }
    Ok(())
}

#[test]
fn bulk_loaded_lobs_behave_like_logged_ones() -> Result<()> {
    let (pager, store) = open(None)?;
    let mut rng = StdRng::seed_from_u64(4);
    let value: Vec<u8> = (0..30_000).map(|_| rng.gen()).collect();

    let mut lob = {
        let mut loader = store.bulk_loader();
        let lob = loader.insert(Stamp::new(TrxId(1), 1), &value)?;
        assert_eq!(
            loader.stats(),
            BulkLoaderStats {
                lobs: 1,
                pages_published: pager.live_pages(),
                bytes: 30_000,
            }
        );
        lob
    };

    assert_eq!(store.read(&lob, 0, value.len())?, value);
    store.validate(&lob)?;
    store.update(&mut lob, Stamp::new(TrxId(2), 1), &[LobDiff::new(29_990, vec![0u8; 10])])?;
    assert_eq!(store.read(&lob, 29_990, 10)?, vec![0u8; 10]);
    store.destroy(&mut lob)?;
    assert_eq!(pager.live_pages(), 0);
    Ok(())
}

#[test]
fn failed_bulk_insert_returns_its_pages() -> Result<()> {
    let (pager, store) = open(Some(4))?;
    let mut loader = store.bulk_loader();
    let err = loader.insert(Stamp::new(TrxId(1), 1), &vec![7u8; 50_000]).unwrap_err();
    assert!(matches!(err, LobError::OutOfSpace));
    assert_eq!(pager.live_pages(), 0);

    let lob = loader.insert(Stamp::new(TrxId(1), 2), b"small")?;
    assert_eq!(loader.stats().lobs, 1);
    drop(loader);
    assert_eq!(store.read(&lob, 0, 5)?, b"small");
    Ok(())
}
