use rand_core::RngCore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub items: Vec<String>,
}

impl Topic {
    pub fn new(name: impl Into<String>, items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSource {
    Flat(Vec<String>),
    Grouped(Vec<Topic>),
}

impl Default for TextSource {
    fn default() -> Self {
        TextSource::Flat(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block<'a> {
    Heading(&'a str),
    Item(&'a str),
}

impl TextSource {
    pub fn flat(items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        TextSource::Flat(items.into_iter().map(Into::into).collect())
    }

    pub fn unit_count(&self) -> usize {
        self.items().filter(|item| !is_blank(item)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.unit_count() == 0
    }

    fn items(&self) -> Box<dyn Iterator<Item = &String> + '_> {
        match self {
            TextSource::Flat(items) => Box::new(items.iter()),
            TextSource::Grouped(topics) => Box::new(topics.iter().flat_map(|t| t.items.iter())),
        }
    }

    // Blocks to place. Blank units are dropped, and a topic with no
    // remaining units contributes no heading.
    pub fn blocks(&self, topic_headings: bool) -> Vec<Block<'_>> {
        match self {
            TextSource::Flat(items) => items
                .iter()
                .filter(|item| !is_blank(item))
                .map(|item| Block::Item(item.as_str()))
                .collect(),
            TextSource::Grouped(topics) => {
                let mut out = Vec::new();
                for topic in topics {
                    let mut items = topic.items.iter().filter(|item| !is_blank(item)).peekable();
                    if items.peek().is_none() {
                        continue;
                    }
                    if topic_headings && !is_blank(&topic.name) {
                        out.push(Block::Heading(topic.name.trim()));
                    }
                    out.extend(items.map(|item| Block::Item(item.as_str())));
                }
                out
            }
        }
    }

    pub fn shuffled<R: RngCore + ?Sized>(&self, rng: &mut R) -> TextSource {
        match self {
            TextSource::Flat(items) => {
                let mut items = items.clone();
                shuffle(&mut items, rng);
                TextSource::Flat(items)
            }
            TextSource::Grouped(topics) => {
                let mut topics = topics.clone();
                shuffle(&mut topics, rng);
                for topic in &mut topics {
                    shuffle(&mut topic.items, rng);
                }
                TextSource::Grouped(topics)
            }
        }
    }
}

pub fn shuffle<T, R: RngCore + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct TestRng(pub u64);

    impl RngCore for TestRng {
        fn next_u32(&mut self) -> u32 {
            (self.next_u64() >> 32) as u32
        }

        fn next_u64(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            self.0 = x;
            x.wrapping_mul(0x2545_F491_4F6C_DD1D)
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            for chunk in dst.chunks_mut(8) {
                let bytes = self.next_u64().to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
        }
    }

    #[test]
    fn shuffle_is_a_permutation_and_seed_deterministic() {
        let src = TextSource::flat((0..50).map(|i| i.to_string()));
        let a = src.shuffled(&mut TestRng(7));
        let b = src.shuffled(&mut TestRng(7));
        assert_eq!(a, b);
        assert_ne!(a, src);
        let TextSource::Flat(mut items) = a else {
            panic!("shape changed");
        };
        items.sort_by_key(|s| s.parse::<u32>().unwrap());
        assert_eq!(TextSource::Flat(items), src);
    }

    #[test]
    fn grouped_shuffle_keeps_items_inside_their_topic() {
        let src = TextSource::Grouped(vec![
            Topic::new("A", ["a1", "a2", "a3", "a4"]),
            Topic::new("B", ["b1", "b2", "b3"]),
            Topic::new("C", ["c1"]),
        ]);
        let TextSource::Grouped(topics) = src.shuffled(&mut TestRng(99)) else {
            panic!("shape changed");
        };
        assert_eq!(topics.len(), 3);
        for topic in topics {
            let prefix = topic.name.to_ascii_lowercase();
            assert!(topic.items.iter().all(|item| item.starts_with(&prefix)));
        }
    }

    #[test]
    fn blocks_skip_blank_units_and_empty_topics() {
        let src = TextSource::Grouped(vec![
            Topic::new("Empty", ["", "  "]),
            Topic::new("Tips", ["one", " ", "two"]),
        ]);
        assert_eq!(
            src.blocks(true),
            vec![Block::Heading("Tips"), Block::Item("one"), Block::Item("two")]
        );
        assert_eq!(src.blocks(false), vec![Block::Item("one"), Block::Item("two")]);
        assert_eq!(src.unit_count(), 2);
        assert!(TextSource::flat(["", "\t"]).is_empty());
    }
}
