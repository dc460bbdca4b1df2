//! Key-space partition planner
//!
//! Partitions divide the key domain by equal key span, not equal row
//! count. Boundaries are `start_i = min + floor(i * (max - min) / P)`,
//! computed in 128-bit arithmetic so extreme i64 domains cannot overflow.
//! Every partition but the last is half-open; the last is closed and also
//! owns rows with a NULL key.

use crate::plan::{KeyDomain, Partition, TableSpec};
use crate::source::ScanRange;
use tracing::debug;

/// Split the table's key domain into at most `parallelism` partitions
///
/// Emits a single full-scan partition when the table has no usable key or
/// the key domain is empty. When the domain holds fewer values than
/// `parallelism`, emits one partition per value instead of empty ranges.
pub fn plan_partitions(spec: &TableSpec, parallelism: usize) -> Vec<Partition> {
    let p = parallelism.max(1);

    let Some(domain) = spec.key.as_ref().and_then(|k| k.domain.as_ref()) else {
        debug!(table = %spec.name, "No key domain, planning a single full scan");
        return vec![Partition::full(0)];
    };

    let partitions = match domain.distinct {
        Some(ref keys) if !keys.is_empty() && keys.len() <= p => by_distinct_keys(keys, domain.max),
        _ if domain.span() <= p as u128 => by_single_values(domain),
        _ => by_key_span(domain, p),
    };

    debug!(
        table = %spec.name,
        requested = p,
        planned = partitions.len(),
        "Partitions planned"
    );
    partitions
}

/// `[k_i, k_i+1)` for each known key, last one closed at `max`
fn by_distinct_keys(keys: &[i64], max: i64) -> Vec<Partition> {
    let last = keys.len() - 1;
    keys.iter()
        .enumerate()
        .map(|(i, &start)| Partition {
            id: i,
            range: if i == last {
                ScanRange::Keys {
                    start,
                    end: max.max(start),
                    end_inclusive: true,
                }
            } else {
                ScanRange::Keys {
                    start,
                    end: keys[i + 1],
                    end_inclusive: false,
                }
            },
        })
        .collect()
}

/// One partition per integer value of a narrow domain
fn by_single_values(domain: &KeyDomain) -> Vec<Partition> {
    let count = domain.span() as usize;
    (0..count)
        .map(|i| {
            let start = domain.min + i as i64;
            Partition {
                id: i,
                range: if i == count - 1 {
                    ScanRange::Keys {
                        start,
                        end: domain.max,
                        end_inclusive: true,
                    }
                } else {
                    ScanRange::Keys {
                        start,
                        end: start + 1,
                        end_inclusive: false,
                    }
                },
            }
        })
        .collect()
}

fn by_key_span(domain: &KeyDomain, p: usize) -> Vec<Partition> {
    let min = domain.min as i128;
    let width = domain.max as i128 - min;
    let boundary = |i: usize| -> i64 { (min + (i as i128 * width) / p as i128) as i64 };

    (0..p)
        .map(|i| Partition {
            id: i,
            range: if i == p - 1 {
                ScanRange::Keys {
                    start: boundary(i),
                    end: domain.max,
                    end_inclusive: true,
                }
            } else {
                ScanRange::Keys {
                    start: boundary(i),
                    end: boundary(i + 1),
                    end_inclusive: false,
                }
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::KeyColumn;
    use crate::source::{ColumnSpec, LogicalType};
    use proptest::prelude::*;

    fn spec(domain: Option<KeyDomain>) -> TableSpec {
        TableSpec {
            name: "ORDERS".into(),
            columns: vec![ColumnSpec::new("ID", LogicalType::Int64)],
            key: Some(KeyColumn {
                name: "ID".into(),
                domain,
            }),
            row_count: 0,
        }
    }

    fn domain(min: i64, max: i64) -> Option<KeyDomain> {
        Some(KeyDomain {
            min,
            max,
            distinct: None,
        })
    }

    fn keys(start: i64, end: i64, end_inclusive: bool) -> ScanRange {
        ScanRange::Keys {
            start,
            end,
            end_inclusive,
        }
    }

    #[test]
    fn test_thousand_keys_four_ways() {
        let parts = plan_partitions(&spec(domain(1, 1000)), 4);
        let ranges: Vec<_> = parts.iter().map(|p| p.range).collect();
        assert_eq!(
            ranges,
            vec![
                keys(1, 250, false),
                keys(250, 500, false),
                keys(500, 750, false),
                keys(750, 1000, true),
            ]
        );
        assert_eq!(parts.iter().map(|p| p.id).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_no_key_single_full_partition() {
        let mut s = spec(None);
        s.key = None;
        assert_eq!(plan_partitions(&s, 8), vec![Partition::full(0)]);
    }

    #[test]
    fn test_empty_table_single_full_partition() {
        assert_eq!(plan_partitions(&spec(None), 8), vec![Partition::full(0)]);
    }

    #[test]
    fn test_distinct_keys_fewer_than_parallelism() {
        let s = spec(Some(KeyDomain {
            min: 10,
            max: 5000,
            distinct: Some(vec![10, 20, 5000]),
        }));
        let ranges: Vec<_> = plan_partitions(&s, 8).iter().map(|p| p.range).collect();
        assert_eq!(
            ranges,
            vec![keys(10, 20, false), keys(20, 5000, false), keys(5000, 5000, true)]
        );
    }

    #[test]
    fn test_narrow_span_one_partition_per_value() {
        let ranges: Vec<_> = plan_partitions(&spec(domain(7, 9)), 16)
            .iter()
            .map(|p| p.range)
            .collect();
        assert_eq!(
            ranges,
            vec![keys(7, 8, false), keys(8, 9, false), keys(9, 9, true)]
        );
    }

    #[test]
    fn test_single_key_value() {
        let ranges: Vec<_> = plan_partitions(&spec(domain(42, 42)), 4)
            .iter()
            .map(|p| p.range)
            .collect();
        assert_eq!(ranges, vec![keys(42, 42, true)]);
    }

    #[test]
    fn test_extreme_domain_does_not_overflow() {
        let parts = plan_partitions(&spec(domain(i64::MIN, i64::MAX)), 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].range, keys(i64::MIN, -3074457345618258603, false));
        assert_eq!(parts[2].range, keys(3074457345618258602, i64::MAX, true));
    }

    fn assert_covers(min: i64, max: i64, parts: &[Partition]) {
        let ranges: Vec<(i64, i64, bool)> = parts
            .iter()
            .map(|p| match p.range {
                ScanRange::Keys {
                    start,
                    end,
                    end_inclusive,
                } => (start, end, end_inclusive),
                ScanRange::Full => panic!("unexpected full partition"),
            })
            .collect();

        assert_eq!(ranges[0].0, min);
        let last = ranges.len() - 1;
        for (i, &(start, end, inclusive)) in ranges.iter().enumerate() {
            if i == last {
                assert!(inclusive);
                assert_eq!(end, max);
                assert!(start <= end);
            } else {
                assert!(!inclusive);
                assert!(start < end, "empty partition {}", i);
                assert_eq!(end, ranges[i + 1].0, "gap or overlap after {}", i);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_partitions_cover_domain(
            min in -1_000_000_000_000i64..1_000_000_000_000i64,
            width in 0i64..10_000_000,
            p in 1usize..64,
        ) {
            let max = min + width;
            let parts = plan_partitions(&spec(domain(min, max)), p);
            let expected = p.min((width + 1) as usize);
            prop_assert_eq!(parts.len(), expected);
            assert_covers(min, max, &parts);
        }

        #[test]
        fn prop_distinct_keys_cover_domain(
            ks in proptest::collection::btree_set(-1000i64..1000, 1..16),
            p in 16usize..32,
        ) {
            let keys: Vec<i64> = ks.into_iter().collect();
            let min = keys[0];
            let max = *keys.last().unwrap();
            let s = spec(Some(KeyDomain { min, max, distinct: Some(keys.clone()) }));
            let parts = plan_partitions(&s, p);
            prop_assert_eq!(parts.len(), keys.len());
            assert_covers(min, max, &parts);
        }
    }
}
