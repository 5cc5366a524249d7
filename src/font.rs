use crate::error::PageTileError;
use crate::types::Px;
use crate::wrap::TextMeasure;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const NARROW_EM: f32 = 0.6;
const WIDE_EM: f32 = 1.0;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font_index: Option<usize>,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Px>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &TextWidthKey) -> Option<Px> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: Px) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            let Some(old) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&old);
        }
    }
}

#[derive(Debug)]
pub struct RegisteredFont {
    pub name: String,
    pub(crate) data: Arc<Vec<u8>>,
    pub units_per_em: u16,
    pub ascender: i16,
    pub descender: i16,
}

impl RegisteredFont {
    fn from_bytes(data: Vec<u8>, source: &Path) -> Option<(Self, Vec<String>)> {
        let face = ttf_parser::Face::parse(&data, 0).ok()?;
        let (name, aliases) = font_names(&face, source);
        let units_per_em = face.units_per_em().max(1);
        let ascender = face.ascender();
        let descender = face.descender();
        drop(face);
        Some((
            Self {
                name,
                data: Arc::new(data),
                units_per_em,
                ascender,
                descender,
            },
            aliases,
        ))
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }
}

// Fonts available for measuring and drawing. The first registered font is
// the default for any family that does not resolve by name.
#[derive(Debug)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
    text_width_cache: Mutex<TextWidthCache>,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            text_width_cache: Mutex::new(TextWidthCache::new(20_000)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn register_dir(&mut self, path: impl AsRef<Path>) -> usize {
        let Ok(entries) = fs::read_dir(path.as_ref()) else {
            return 0;
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_font_extension(path))
            .collect();
        files.sort();
        files
            .into_iter()
            .filter(|path| self.register_file(path).is_ok())
            .count()
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) -> Result<String, PageTileError> {
        let path = path.as_ref();
        if !has_font_extension(path) {
            return Err(PageTileError::InvalidConfiguration(format!(
                "unsupported font file {}",
                path.display()
            )));
        }
        let data = fs::read(path)?;
        self.register_source(data, path)
    }

    pub fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, PageTileError> {
        let source = source_name.unwrap_or("EmbeddedFont");
        self.register_source(data, Path::new(source))
    }

    fn register_source(&mut self, data: Vec<u8>, source: &Path) -> Result<String, PageTileError> {
        let Some((font, aliases)) = RegisteredFont::from_bytes(data, source) else {
            return Err(PageTileError::InvalidConfiguration(format!(
                "invalid font data for {}",
                source.display()
            )));
        };
        let name = font.name.clone();
        let index = self.fonts.len();
        self.fonts.push(font);
        for alias in std::iter::once(name.clone()).chain(aliases) {
            let key = normalize_name(&alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        Ok(name)
    }

    pub fn register_system_fallback(&mut self) -> Option<String> {
        let path = find_system_font(&system_font_dirs(), SYSTEM_FALLBACK_FILES)?;
        self.register_file(path).ok()
    }

    fn resolve_index(&self, family: Option<&str>) -> Option<usize> {
        if let Some(family) = family {
            if let Some(index) = self.lookup.get(&normalize_name(family)) {
                return Some(*index);
            }
        }
        if self.fonts.is_empty() { None } else { Some(0) }
    }

    pub fn resolve(&self, family: Option<&str>) -> Option<&RegisteredFont> {
        self.resolve_index(family)
            .and_then(|index| self.fonts.get(index))
    }

    pub fn measure_text_width(&self, family: Option<&str>, font_size: Px, text: &str) -> Px {
        if text.is_empty() {
            return Px::ZERO;
        }
        let font_index = self.resolve_index(family);
        let key = TextWidthKey {
            font_index,
            size_milli: font_size.to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(cache) = self.text_width_cache.lock() {
            if let Some(value) = cache.get(&key) {
                return value;
            }
        }
        let value = font_index
            .and_then(|index| self.fonts.get(index))
            .and_then(|font| measure_text_width_shaped(font, font_size, text))
            .unwrap_or_else(|| approximate_text_width(font_size, text));
        if let Ok(mut cache) = self.text_width_cache.lock() {
            cache.insert(key, value);
        }
        value
    }

    pub fn measure_for<'a>(&'a self, family: Option<&'a str>) -> FontMeasure<'a> {
        FontMeasure {
            registry: self,
            family,
        }
    }
}

#[derive(Clone, Copy)]
pub struct FontMeasure<'a> {
    registry: &'a FontRegistry,
    family: Option<&'a str>,
}

impl TextMeasure for FontMeasure<'_> {
    fn measure(&self, text: &str, font_size: Px) -> Px {
        self.registry
            .measure_text_width(self.family, font_size, text)
    }
}

// Width used when no font resolves: 0.6 em per narrow character, 1 em per
// wide (CJK, fullwidth) character.
pub fn approximate_text_width(font_size: Px, text: &str) -> Px {
    text.chars().map(|ch| approximate_char_width(font_size, ch)).sum()
}

fn approximate_char_width(font_size: Px, ch: char) -> Px {
    let em = if is_wide_char(ch) { WIDE_EM } else { NARROW_EM };
    (font_size * em).max(Px::from_i32(1))
}

pub(crate) fn is_wide_char(ch: char) -> bool {
    matches!(
        ch as u32,
        0x1100..=0x115F
            | 0x2E80..=0xA4CF
            | 0xAC00..=0xD7A3
            | 0xF900..=0xFAFF
            | 0xFE30..=0xFE4F
            | 0xFF00..=0xFF60
            | 0xFFE0..=0xFFE6
            | 0x20000..=0x3FFFD
    )
}

fn measure_text_width_shaped(font: &RegisteredFont, font_size: Px, text: &str) -> Option<Px> {
    let face = HbFace::from_slice(font.data(), 0)?;
    let units_per_em = face.units_per_em().max(1) as f32;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if positions.is_empty() || infos.len() != positions.len() {
        return None;
    }
    let size = font_size.to_f32();
    let mut total = Px::ZERO;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        // .notdef: fall back to the approximation for the source character.
        if info.glyph_id == 0 {
            let ch = text
                .get(info.cluster as usize..)
                .and_then(|rest| rest.chars().next())
                .unwrap_or(' ');
            total += approximate_char_width(font_size, ch);
            continue;
        }
        total += Px::from_f32(pos.x_advance as f32 / units_per_em * size);
    }
    Some(total)
}

pub(crate) fn detect_direction(text: &str) -> HbDirection {
    let rtl = text.chars().any(|ch| {
        matches!(
            ch as u32,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        )
    });
    if rtl {
        HbDirection::RightToLeft
    } else {
        HbDirection::LeftToRight
    }
}

const SYSTEM_FALLBACK_FILES: &[&str] = &[
    "NotoSansCJK-Regular.ttc",
    "NotoSansCJKsc-Regular.otf",
    "NotoSansSC-Regular.otf",
    "NotoSansSC-Regular.ttf",
    "SourceHanSansSC-Regular.otf",
    "wqy-microhei.ttc",
    "wqy-zenhei.ttc",
    "msyh.ttc",
    "simhei.ttf",
    "PingFang.ttc",
    "Hiragino Sans GB.ttc",
    "NotoSans-Regular.ttf",
    "DejaVuSans.ttf",
    "LiberationSans-Regular.ttf",
    "arial.ttf",
];

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(&home).join(".fonts"));
            dirs.push(PathBuf::from(home).join(".local/share/fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    if let Ok(extra) = std::env::var("PAGETILE_FONT_DIR") {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    dirs
}

fn find_system_font(dirs: &[PathBuf], candidates: &[&str]) -> Option<PathBuf> {
    let mut found: HashMap<String, PathBuf> = HashMap::new();
    let mut stack: Vec<(PathBuf, usize)> = dirs.iter().map(|d| (d.clone(), 0)).collect();
    while let Some((dir, depth)) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if depth < 4 {
                    stack.push((path, depth + 1));
                }
                continue;
            }
            let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
                continue;
            };
            found.entry(name.to_ascii_lowercase()).or_insert(path);
        }
    }
    for candidate in candidates {
        let Some(path) = found.get(&candidate.to_ascii_lowercase()) else {
            continue;
        };
        let Ok(bytes) = fs::read(path) else {
            continue;
        };
        if ttf_parser::Face::parse(&bytes, 0).is_ok() {
            return Some(path.clone());
        }
    }
    None
}

fn has_font_extension(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
        return false;
    };
    matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc")
}

fn font_names(face: &ttf_parser::Face<'_>, path: &Path) -> (String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;

    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                family.get_or_insert(name);
            }
            name_id::FULL_NAME => {
                full.get_or_insert(name);
            }
            name_id::POST_SCRIPT_NAME => {
                post.get_or_insert(name);
            }
            _ => {}
        }
    }

    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    let primary = family
        .clone()
        .or_else(|| full.clone())
        .or_else(|| post.clone())
        .or_else(|| stem.clone())
        .unwrap_or_else(|| "EmbeddedFont".to_string());

    let aliases = [family, full, post, stem]
        .into_iter()
        .flatten()
        .filter(|candidate| *candidate != primary)
        .collect();
    (primary, aliases)
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_uses_em_approximation() {
        let registry = FontRegistry::new();
        let size = Px::from_i32(45);
        assert_eq!(
            registry.measure_text_width(None, size, "ab").to_milli_i64(),
            54_000
        );
        assert_eq!(
            registry.measure_text_width(None, size, "中文").to_milli_i64(),
            90_000
        );
        assert_eq!(registry.measure_text_width(None, size, ""), Px::ZERO);
    }

    #[test]
    fn measure_for_binds_the_family() {
        let registry = FontRegistry::new();
        let measure = registry.measure_for(Some("Missing Sans"));
        assert_eq!(
            measure.measure("abc", Px::from_i32(10)).to_milli_i64(),
            18_000
        );
    }

    #[test]
    fn invalid_font_bytes_are_rejected() {
        let mut registry = FontRegistry::new();
        let err = registry
            .register_bytes(vec![0, 1, 2, 3], Some("broken.ttf"))
            .unwrap_err();
        assert!(matches!(err, PageTileError::InvalidConfiguration(_)));
        assert!(registry.is_empty());
        assert!(registry.resolve(None).is_none());
    }

    #[test]
    fn register_file_rejects_unknown_extensions() {
        let mut registry = FontRegistry::new();
        assert!(registry.register_file("notes.txt").is_err());
    }

    #[test]
    fn width_cache_evicts_oldest_entries() {
        let mut cache = TextWidthCache::new(2);
        let key = |t: &str| TextWidthKey {
            font_index: None,
            size_milli: 1000,
            text: t.to_string(),
        };
        cache.insert(key("a"), Px::from_i32(1));
        cache.insert(key("b"), Px::from_i32(2));
        cache.insert(key("c"), Px::from_i32(3));
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.get(&key("c")), Some(Px::from_i32(3)));
    }

    #[test]
    fn wide_char_ranges_cover_cjk_and_fullwidth_punctuation() {
        assert!(is_wide_char('中'));
        assert!(is_wide_char('，'));
        assert!(is_wide_char('。'));
        assert!(!is_wide_char('a'));
        assert!(!is_wide_char('.'));
    }
}
