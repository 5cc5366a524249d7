#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetrics {
    pub page_number: usize,
    pub line_count: usize,
    pub has_title: bool,
    pub background: Option<(String, usize)>,
    pub render_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMetrics {
    pub notes: usize,
    pub pages: Vec<PageMetrics>,
    pub units_consumed: usize,
    pub pages_trimmed: usize,
    pub total_render_ms: f64,
}

impl RunMetrics {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn line_count(&self) -> usize {
        self.pages.iter().map(|p| p.line_count).sum()
    }
}
