use std::collections::HashMap;

use crate::types::Px;

pub trait TextMeasure {
    fn measure(&self, text: &str, font_size: Px) -> Px;
}

impl<F> TextMeasure for F
where
    F: Fn(&str, Px) -> Px,
{
    fn measure(&self, text: &str, font_size: Px) -> Px {
        self(text, font_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedLine {
    pub text: String,
    pub is_first_of_unit: bool,
}

const NO_TRAILING: &[char] = &[
    '(', '[', '{', '“', '‘', '《', '〈', '「', '『', '【', '（', '〔', '［', '｛',
];

const NO_LEADING: &[char] = &[
    ')', ']', '}', '”', '’', '》', '〉', '」', '』', '】', '）', '〕', '］', '｝', '，', '。',
    '、', '；', '：', '！', '？', ',', '.', ';', ':', '!', '?', '…', '·',
];

const OVERRUN_RATIO: f32 = 1.05;

pub fn is_no_trailing(ch: char) -> bool {
    NO_TRAILING.contains(&ch)
}

pub fn is_no_leading(ch: char) -> bool {
    NO_LEADING.contains(&ch)
}

struct CharWidths<'a, M: TextMeasure + ?Sized> {
    measure: &'a M,
    font_size: Px,
    ascii: [Option<Px>; 128],
    other: HashMap<char, Px>,
}

impl<'a, M: TextMeasure + ?Sized> CharWidths<'a, M> {
    fn new(measure: &'a M, font_size: Px) -> Self {
        Self {
            measure,
            font_size,
            ascii: [None; 128],
            other: HashMap::new(),
        }
    }

    fn width(&mut self, ch: char) -> Px {
        let code = ch as usize;
        if code < 128 {
            if let Some(w) = self.ascii[code] {
                return w;
            }
        } else if let Some(w) = self.other.get(&ch) {
            return *w;
        }
        let mut buf = [0u8; 4];
        let w = self.measure.measure(ch.encode_utf8(&mut buf), self.font_size);
        if code < 128 {
            self.ascii[code] = Some(w);
        } else {
            self.other.insert(ch, w);
        }
        w
    }
}

// Breaks between any two characters. Punctuation may overrun `max_width` by
// 5%, otherwise characters before the break move down with it.
pub fn wrap<M: TextMeasure + ?Sized>(
    measure: &M,
    text: &str,
    font_size: Px,
    max_width: Px,
) -> Vec<WrappedLine> {
    if text.is_empty() || measure.measure(text, font_size) <= max_width {
        return vec![WrappedLine {
            text: text.to_string(),
            is_first_of_unit: true,
        }];
    }

    let chars: Vec<char> = text.chars().collect();
    let mut cache = CharWidths::new(measure, font_size);
    let widths: Vec<Px> = chars.iter().map(|ch| cache.width(*ch)).collect();
    let overrun_limit = max_width * OVERRUN_RATIO;

    let mut breaks = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    let mut line_width = Px::ZERO;
    while i < chars.len() {
        let w = widths[i];
        if i == start || line_width + w <= max_width {
            line_width += w;
            i += 1;
            continue;
        }

        let prev = chars[i - 1];
        let next = chars[i];
        let mut end = i;
        if is_no_leading(next) || is_no_trailing(prev) {
            let mut pulled = line_width;
            let mut j = i;
            while j < chars.len() && pulled + widths[j] <= overrun_limit {
                pulled += widths[j];
                j += 1;
                let leading_next = j < chars.len() && is_no_leading(chars[j]);
                if !leading_next && !is_no_trailing(chars[j - 1]) {
                    break;
                }
            }
            let settled = j > i
                && (j == chars.len() || !is_no_leading(chars[j]))
                && !is_no_trailing(chars[j - 1]);
            if settled {
                end = j;
            } else {
                // Carry back far enough that the next line does not open
                // on a closing mark and this one does not end on an opener.
                let mut back = i - 1;
                while back > start && (is_no_leading(chars[back]) || is_no_trailing(chars[back - 1])) {
                    back -= 1;
                }
                if back > start {
                    end = back;
                }
            }
        }

        breaks.push((start, end));
        start = end;
        i = end;
        line_width = Px::ZERO;
    }
    if start < chars.len() {
        breaks.push((start, chars.len()));
    }

    breaks
        .into_iter()
        .enumerate()
        .map(|(idx, (from, to))| WrappedLine {
            text: chars[from..to].iter().collect(),
            is_first_of_unit: idx == 0,
        })
        .collect()
}
