//! Rename-tolerant identity matching
//!
//! Joins one router's device listing to the corresponding mirror rows by
//! external id. Names and parameters drift; the external id is the only
//! stable identity, so the join ignores everything else. One hash join,
//! O(n), no ordering guarantee on the outputs.

use std::collections::HashMap;

/// Output of one identity join for a (router, class) pair
#[derive(Debug)]
pub struct MatchSet<'d, 'l, D, L> {
    /// Device record and mirror row sharing an external id
    pub matched: Vec<(&'d D, &'l L)>,
    /// Device records with no mirror row ("missing in DB")
    pub missing_in_db: Vec<&'d D>,
    /// Mirror rows the device no longer reports ("missing in device")
    pub missing_in_device: Vec<&'l L>,
}

/// Join device records to mirror rows by external id.
///
/// `device_key`/`local_key` extract the external id from each side. A
/// duplicate external id on the device side joins once; later duplicates
/// surface as missing-in-db so the synchronizer can flag them.
pub fn match_by_external_id<'d, 'l, D, L>(
    device: &'d [D],
    local: &'l [L],
    device_key: impl Fn(&D) -> &str,
    local_key: impl Fn(&L) -> &str,
) -> MatchSet<'d, 'l, D, L> {
    let mut by_id: HashMap<&str, &'l L> = local
        .iter()
        .map(|record| (local_key(record), record))
        .collect();

    let mut matched = Vec::new();
    let mut missing_in_db = Vec::new();
    for record in device {
        match by_id.remove(device_key(record)) {
            Some(row) => matched.push((record, row)),
            None => missing_in_db.push(record),
        }
    }

    MatchSet {
        matched,
        missing_in_db,
        missing_in_device: by_id.into_values().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Rec {
        ext: &'static str,
        name: &'static str,
    }

    fn rec(ext: &'static str, name: &'static str) -> Rec {
        Rec { ext, name }
    }

    #[test]
    fn joins_by_external_id_only() {
        let device = vec![rec("*1", "renamed"), rec("*2", "new-on-device")];
        let local = vec![rec("*1", "old-name"), rec("*9", "stale-row")];

        let set = match_by_external_id(&device, &local, |d| d.ext, |l| l.ext);

        assert_eq!(set.matched.len(), 1);
        assert_eq!(set.matched[0].0.name, "renamed");
        assert_eq!(set.matched[0].1.name, "old-name");
        assert_eq!(set.missing_in_db, vec![&device[1]]);
        assert_eq!(set.missing_in_device, vec![&local[1]]);
    }

    #[test]
    fn empty_sides_yield_empty_buckets() {
        let device: Vec<Rec> = Vec::new();
        let local: Vec<Rec> = Vec::new();
        let set = match_by_external_id(&device, &local, |d| d.ext, |l| l.ext);
        assert!(set.matched.is_empty());
        assert!(set.missing_in_db.is_empty());
        assert!(set.missing_in_device.is_empty());
    }

    #[test]
    fn duplicate_device_ids_join_once() {
        let device = vec![rec("*1", "first"), rec("*1", "dup")];
        let local = vec![rec("*1", "row")];
        let set = match_by_external_id(&device, &local, |d| d.ext, |l| l.ext);
        assert_eq!(set.matched.len(), 1);
        assert_eq!(set.missing_in_db.len(), 1);
        assert_eq!(set.missing_in_db[0].name, "dup");
    }
}
