#![forbid(unsafe_code)]
//! Version chains hanging off index entries.
//!
//! Each live entry carries a list of strictly older images of the same
//! chunk, newest first. A reader bound to LOB version `V` reads the entry
//! itself when its stamp is at most `V`, otherwise the first older image
//! whose stamp is at most `V`.

use tracing::warn;

use super::entry::{IndexEntry, LobFirstPage, Stamp};
use super::flst;
use crate::primitives::mtr::PageAccess;
use crate::types::{LobVersion, Result};

/// Resolves which image of `entry` a reader bound to `bound` sees.
///
/// When neither the entry nor any older image qualifies, the newest image is
/// returned anyway.
pub fn visible<E: IndexEntry, A: PageAccess + ?Sized>(
    a: &mut A,
    entry: E,
    bound: LobVersion,
) -> Result<E> {
    let stamp = entry.lob_version(a)?;
    if stamp <= bound {
        return Ok(entry);
    }
    let mut node = flst::first(a, entry.versions()?)?;
    while !node.is_null() {
        let older = E::at(node);
        if older.lob_version(a)? <= bound {
            return Ok(older);
        }
        node = flst::next(a, node)?;
    }
    warn!(
        entry = ?entry.addr(),
        stamp,
        bound,
        "lob.read.no_visible_version"
    );
    Ok(entry)
}

/// Replaces live entry `old` with `new` in the index list and pushes `old`
/// onto the front of `new`'s versions list, which inherits `old`'s history.
/// `old` is stamped as superseded by `by`.
pub fn supersede<F: LobFirstPage, A: PageAccess + ?Sized>(
    a: &mut A,
    first: F,
    old: F::Entry,
    new: F::Entry,
    by: Stamp,
) -> Result<()> {
    let index = first.index_list();
    flst::insert_before(a, index, old.addr(), new.addr())?;
    flst::remove(a, index, old.addr())?;
    flst::move_base(a, old.versions()?, new.versions()?)?;
    flst::add_first(a, new.versions()?, old.addr())?;
    old.set_modifier(a, by)
}

/// Undoes [`supersede`]: the newest older image of `current` takes its
/// place in the index list and inherits the rest of the history. Returns the
/// restored entry, or `None` when `current` had no history and was simply
/// unlinked.
pub fn restore_previous<F: LobFirstPage, A: PageAccess + ?Sized>(
    a: &mut A,
    first: F,
    current: F::Entry,
) -> Result<Option<F::Entry>> {
    let index = first.index_list();
    let versions = current.versions()?;
    let Some(older) = flst::pop_first(a, versions)? else {
        flst::remove(a, index, current.addr())?;
        return Ok(None);
    };
    flst::insert_before(a, index, current.addr(), older)?;
    flst::remove(a, index, current.addr())?;
    let older = F::Entry::at(older);
    flst::move_base(a, versions, older.versions()?)?;
    older.set_modifier(a, Stamp::NONE)?;
    Ok(Some(older))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lob::addr::FilAddr;
    use crate::lob::entry::live_entries;
    use crate::lob::first_page::{layout, FirstPage};
    use crate::lob::flst::tests::MemPages;
    use crate::lob::index_entry::LobEntry;
    use crate::types::{PageNo, TrxId};

    fn setup() -> (MemPages, FirstPage, Vec<LobEntry>) {
        let mut mem = MemPages::new(1, 4096);
        let first = FirstPage(PageNo(0));
        flst::init(&mut mem, first.index_list()).unwrap();
        let entries: Vec<LobEntry> = (0..4)
            .map(|i| LobEntry::at(FilAddr::new(PageNo(0), layout::ENTRIES + i * LobEntry::SIZE).unwrap()))
            .collect();
        for e in &entries {
            e.reset(&mut mem).unwrap();
        }
        (mem, first, entries)
    }

    fn stamp(trx: u64, undo: u32) -> Stamp {
        Stamp::new(TrxId(trx), undo)
    }

    #[test]
    fn supersede_and_restore_round_trip() {
        let (mut mem, first, e) = setup();
        e[0].set_lob_version(&mut mem, 1).unwrap();
        flst::add_last(&mut mem, first.index_list(), e[0].addr()).unwrap();
        e[1].set_lob_version(&mut mem, 2).unwrap();
        supersede(&mut mem, first, e[0], e[1], stamp(7, 1)).unwrap();
        e[2].set_lob_version(&mut mem, 3).unwrap();
        supersede(&mut mem, first, e[1], e[2], stamp(8, 1)).unwrap();

        assert_eq!(live_entries(&mut mem, first).unwrap(), vec![e[2]]);
        assert_eq!(
            flst::collect(&mut mem, e[2].versions().unwrap()).unwrap(),
            vec![e[1].addr(), e[0].addr()]
        );
        assert_eq!(e[0].modifier(&mut mem).unwrap(), stamp(7, 1));
        assert_eq!(e[1].modifier(&mut mem).unwrap(), stamp(8, 1));

        assert_eq!(visible(&mut mem, e[2], 3).unwrap(), e[2]);
        assert_eq!(visible(&mut mem, e[2], 2).unwrap(), e[1]);
        assert_eq!(visible(&mut mem, e[2], 1).unwrap(), e[0]);

        let restored = restore_previous(&mut mem, first, e[2]).unwrap();
        assert_eq!(restored, Some(e[1]));
        assert_eq!(live_entries(&mut mem, first).unwrap(), vec![e[1]]);
        assert_eq!(e[1].modifier(&mut mem).unwrap(), Stamp::NONE);
        assert_eq!(
            flst::collect(&mut mem, e[1].versions().unwrap()).unwrap(),
            vec![e[0].addr()]
        );
        assert_eq!(flst::validate(&mut mem, e[2].versions().unwrap()).unwrap(), 0);
    }

    #[test]
    fn no_visible_version_falls_back_to_newest() {
        let (mut mem, first, e) = setup();
        e[0].set_lob_version(&mut mem, 4).unwrap();
        flst::add_last(&mut mem, first.index_list(), e[0].addr()).unwrap();
        e[1].set_lob_version(&mut mem, 5).unwrap();
        supersede(&mut mem, first, e[0], e[1], stamp(3, 2)).unwrap();
        assert_eq!(visible(&mut mem, e[1], 1).unwrap(), e[1]);
    }

    #[test]
    fn restore_without_history_unlinks() {
        let (mut mem, first, e) = setup();
        flst::add_last(&mut mem, first.index_list(), e[0].addr()).unwrap();
        flst::add_last(&mut mem, first.index_list(), e[3].addr()).unwrap();
        assert_eq!(restore_previous(&mut mem, first, e[0]).unwrap(), None);
        assert_eq!(live_entries(&mut mem, first).unwrap(), vec![e[3]]);
    }
}
