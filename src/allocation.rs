use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use crate::error::PageTileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationPolicy {
    #[default]
    Shared,
    Exclusive,
    ExclusiveTitleOnce,
}

impl AllocationPolicy {
    pub fn is_exclusive(self) -> bool {
        !matches!(self, AllocationPolicy::Shared)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AllocationPolicy::Shared => "shared",
            AllocationPolicy::Exclusive => "exclusive",
            AllocationPolicy::ExclusiveTitleOnce => "exclusiveTitleOnce",
        }
    }
}

impl fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationPolicy {
    type Err = PageTileError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "shared" | "flexible" => Ok(AllocationPolicy::Shared),
            "exclusive" | "strict" => Ok(AllocationPolicy::Exclusive),
            "exclusivetitleonce" | "strictsingletitle" => Ok(AllocationPolicy::ExclusiveTitleOnce),
            _ => Err(PageTileError::InvalidConfiguration(format!(
                "unknown allocation policy {raw:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialUnit {
    pub source_index: usize,
    pub tile_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    // `None` when a shared pool is empty; the page is drawn on black.
    pub unit: Option<MaterialUnit>,
    pub draw_title: bool,
}

// Exclusive policies walk the flattened source × tile space in order.
#[derive(Debug, Clone)]
pub struct Allocator {
    policy: AllocationPolicy,
    pieces: usize,
    next: usize,
    released: VecDeque<MaterialUnit>,
    group_index: usize,
    title_drawn: bool,
}

impl Allocator {
    pub fn new(policy: AllocationPolicy, pieces: usize) -> Self {
        Self {
            policy,
            pieces: pieces.max(1),
            next: 0,
            released: VecDeque::new(),
            group_index: 0,
            title_drawn: false,
        }
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    pub fn total_units(&self, source_count: usize) -> usize {
        source_count.saturating_mul(self.pieces)
    }

    pub fn consumed(&self) -> usize {
        self.next - self.released.len()
    }

    // The title-once flag is scoped to a note, not the whole run.
    pub fn begin_note(&mut self, group_index: usize) {
        self.group_index = group_index;
        self.title_drawn = false;
    }

    pub fn next(&mut self, source_count: usize) -> Result<Allocation, PageTileError> {
        let unit = match self.policy {
            AllocationPolicy::Shared => (source_count > 0).then(|| MaterialUnit {
                source_index: self.group_index % source_count,
                tile_index: 0,
            }),
            AllocationPolicy::Exclusive | AllocationPolicy::ExclusiveTitleOnce => {
                Some(self.next_exclusive(source_count)?)
            }
        };
        let draw_title = match self.policy {
            AllocationPolicy::ExclusiveTitleOnce => !self.title_drawn,
            _ => true,
        };
        self.title_drawn |= draw_title;
        Ok(Allocation { unit, draw_title })
    }

    fn next_exclusive(&mut self, source_count: usize) -> Result<MaterialUnit, PageTileError> {
        if let Some(unit) = self.released.pop_front() {
            return Ok(unit);
        }
        let total = self.total_units(source_count);
        if self.next >= total {
            return Err(PageTileError::MaterialInsufficient {
                requested: self.next + 1,
                available: total,
            });
        }
        let k = self.next;
        self.next += 1;
        Ok(MaterialUnit {
            source_index: k / self.pieces,
            tile_index: k % self.pieces,
        })
    }

    // Returns a unit to the pool; it is handed out again before any fresh
    // unit. Shared units are never consumed, so releasing them is a no-op.
    pub fn release(&mut self, unit: MaterialUnit) {
        if self.policy.is_exclusive() && !self.released.contains(&unit) {
            self.released.push_back(unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn policy_parses_canonical_and_legacy_names() {
        assert_eq!("shared".parse::<AllocationPolicy>().unwrap(), AllocationPolicy::Shared);
        assert_eq!("flexible".parse::<AllocationPolicy>().unwrap(), AllocationPolicy::Shared);
        assert_eq!("strict".parse::<AllocationPolicy>().unwrap(), AllocationPolicy::Exclusive);
        assert_eq!(
            "exclusiveTitleOnce".parse::<AllocationPolicy>().unwrap(),
            AllocationPolicy::ExclusiveTitleOnce
        );
        assert_eq!(
            "exclusive_title_once".parse::<AllocationPolicy>().unwrap(),
            AllocationPolicy::ExclusiveTitleOnce
        );
        assert!("greedy".parse::<AllocationPolicy>().is_err());
        assert_eq!(AllocationPolicy::ExclusiveTitleOnce.to_string(), "exclusiveTitleOnce");
    }

    #[test]
    fn exclusive_walks_sources_then_tiles_and_exhausts() {
        let mut alloc = Allocator::new(AllocationPolicy::Exclusive, 4);
        let mut seen = HashSet::new();
        for k in 0..8 {
            let a = alloc.next(2).unwrap();
            let unit = a.unit.unwrap();
            assert_eq!(unit, MaterialUnit { source_index: k / 4, tile_index: k % 4 });
            assert!(seen.insert(unit));
            assert!(a.draw_title);
        }
        let err = alloc.next(2).unwrap_err();
        assert!(matches!(
            err,
            PageTileError::MaterialInsufficient { requested: 9, available: 8 }
        ));
        assert!(err.to_string().contains("内页素材不够"));
    }

    #[test]
    fn shared_reuses_group_source_forever() {
        let mut alloc = Allocator::new(AllocationPolicy::Shared, 4);
        alloc.begin_note(3);
        for _ in 0..100 {
            let a = alloc.next(2).unwrap();
            assert_eq!(a.unit, Some(MaterialUnit { source_index: 1, tile_index: 0 }));
            assert!(a.draw_title);
        }
        assert_eq!(alloc.next(0).unwrap().unit, None);
    }

    #[test]
    fn title_once_resets_per_note() {
        let mut alloc = Allocator::new(AllocationPolicy::ExclusiveTitleOnce, 1);
        alloc.begin_note(0);
        let titles: Vec<bool> = (0..5).map(|_| alloc.next(10).unwrap().draw_title).collect();
        assert_eq!(titles, vec![true, false, false, false, false]);
        alloc.begin_note(1);
        assert!(alloc.next(10).unwrap().draw_title);
        assert_eq!(alloc.consumed(), 6);
    }

    #[test]
    fn released_units_are_reused_first() {
        let mut alloc = Allocator::new(AllocationPolicy::Exclusive, 1);
        let a = alloc.next(3).unwrap().unit.unwrap();
        let b = alloc.next(3).unwrap().unit.unwrap();
        alloc.release(a);
        assert_eq!(alloc.consumed(), 1);
        assert_eq!(alloc.next(3).unwrap().unit, Some(a));
        assert_eq!(alloc.next(3).unwrap().unit.unwrap().source_index, 2);
        assert_ne!(a, b);
        assert!(alloc.next(3).is_err());
    }
}
