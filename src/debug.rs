use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct DebugLogger {
    inner: Arc<Mutex<DebugState>>,
}

struct DebugState {
    writer: Box<dyn Write + Send>,
    counters: HashMap<String, u64>,
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DebugState {
                writer: Box::new(writer),
                counters: HashMap::new(),
            })),
        }
    }

    pub fn log_json(&self, json: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn log_allocation(
        &self,
        note: usize,
        source: &str,
        source_index: usize,
        tile: usize,
        consumed: usize,
    ) {
        self.log_json(&format!(
            "{{\"type\":\"alloc.unit\",\"note\":{},\"source\":\"{}\",\"source_index\":{},\"tile\":{},\"consumed\":{}}}",
            note,
            json_escape(source),
            source_index,
            tile,
            consumed
        ));
        self.increment("alloc.units", 1);
    }

    pub fn log_page(&self, note: usize, page: usize, lines: usize, title: bool) {
        self.log_json(&format!(
            "{{\"type\":\"page.flush\",\"note\":{},\"page\":{},\"lines\":{},\"title\":{}}}",
            note, page, lines, title
        ));
        self.increment("pages", 1);
        self.increment("lines", lines as u64);
    }

    pub fn log_trim(&self, note: usize, kept: &[usize], removed: &[usize]) {
        self.log_json(&format!(
            "{{\"type\":\"page.trim\",\"note\":{},\"kept\":{},\"removed\":{}}}",
            note,
            json_index_list(kept),
            json_index_list(removed)
        ));
        self.increment("pages.trimmed", removed.len() as u64);
    }

    pub fn log_cleanup(&self, sources: usize) {
        self.log_json(&format!(
            "{{\"type\":\"cache.cleanup\",\"sources\":{}}}",
            sources
        ));
    }

    pub fn log_warning(&self, context: &str, message: &str) {
        self.log_json(&format!(
            "{{\"type\":\"warn\",\"context\":\"{}\",\"message\":\"{}\"}}",
            json_escape(context),
            json_escape(message)
        ));
        self.increment("warnings", 1);
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let mut counters: Vec<(String, u64)> = state.counters.drain().collect();
            counters.sort_by(|a, b| a.0.cmp(&b.0));
            let mut counts_json = String::from("{");
            for (idx, (key, value)) in counters.iter().enumerate() {
                if idx > 0 {
                    counts_json.push(',');
                }
                counts_json.push_str(&format!("\"{}\":{}", json_escape(key), value));
            }
            counts_json.push('}');
            let json = format!(
                "{{\"type\":\"debug.summary\",\"context\":\"{}\",\"counts\":{}}}",
                json_escape(context),
                counts_json
            );
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

fn json_index_list(values: &[usize]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

pub(crate) fn json_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn summary_reports_sorted_counters() {
        let buf = SharedBuf::default();
        let logger = DebugLogger::from_writer(buf.clone());
        logger.log_page(0, 0, 3, true);
        logger.log_page(0, 1, 2, false);
        logger.emit_summary("note");
        logger.flush();
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let last = text.lines().last().unwrap();
        assert_eq!(
            last,
            "{\"type\":\"debug.summary\",\"context\":\"note\",\"counts\":{\"lines\":5,\"pages\":2}}"
        );
    }

    #[test]
    fn json_escape_handles_quotes_and_controls() {
        assert_eq!(json_escape("a\"b\\c\n"), "a\\\"b\\\\c\\n");
        assert_eq!(json_escape("\u{1}"), "\\u0001");
    }
}
