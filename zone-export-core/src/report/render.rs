//! Renderers for [`LogDocument`] trees

use super::{LogDocument, LogFormat};
use crate::error::Result;
use serde_json::{json, Map, Value};

/// Callbacks for a depth-first walk of a log document
pub trait LogVisitor {
    fn begin_document(&mut self, title: &str);
    fn end_document(&mut self) {}
    /// `depth` is 0 for top-level sections
    fn begin_section(&mut self, title: &str, depth: usize);
    fn end_section(&mut self, _depth: usize) {}
    fn paragraph(&mut self, text: &str);
    fn fields(&mut self, entries: &[(String, String)]);
    fn table(&mut self, headers: &[String], rows: &[Vec<String>]);
    fn list(&mut self, items: &[String]);
}

/// Render a document into the requested encoding
pub fn render(doc: &LogDocument, format: LogFormat) -> Result<String> {
    match format {
        LogFormat::Markdown => {
            let mut renderer = MarkdownRenderer::default();
            doc.accept(&mut renderer);
            Ok(renderer.finish())
        }
        LogFormat::Text => {
            let mut renderer = PlainTextRenderer::default();
            doc.accept(&mut renderer);
            Ok(renderer.finish())
        }
        LogFormat::Json => {
            let mut renderer = JsonRenderer::default();
            doc.accept(&mut renderer);
            Ok(serde_json::to_string_pretty(&renderer.finish())?)
        }
    }
}

#[derive(Debug, Default)]
pub struct MarkdownRenderer {
    out: String,
}

impl MarkdownRenderer {
    pub fn finish(self) -> String {
        self.out
    }

    fn block(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push_str("\n\n");
    }
}

fn md_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace('\n', " ")
}

impl LogVisitor for MarkdownRenderer {
    fn begin_document(&mut self, title: &str) {
        self.block(&format!("# {title}"));
    }

    fn end_document(&mut self) {
        let trimmed = self.out.trim_end().len();
        self.out.truncate(trimmed);
        self.out.push('\n');
    }

    fn begin_section(&mut self, title: &str, depth: usize) {
        let level = "#".repeat((depth + 2).min(6));
        self.block(&format!("{level} {title}"));
    }

    fn paragraph(&mut self, text: &str) {
        self.block(text);
    }

    fn fields(&mut self, entries: &[(String, String)]) {
        let lines: Vec<String> = entries
            .iter()
            .map(|(k, v)| format!("- **{k}**: {v}"))
            .collect();
        self.block(&lines.join("\n"));
    }

    fn table(&mut self, headers: &[String], rows: &[Vec<String>]) {
        let mut lines = Vec::with_capacity(rows.len() + 2);
        lines.push(format!(
            "| {} |",
            headers.iter().map(|h| md_cell(h)).collect::<Vec<_>>().join(" | ")
        ));
        lines.push(format!("|{}", "---|".repeat(headers.len())));
        for row in rows {
            lines.push(format!(
                "| {} |",
                row.iter().map(|c| md_cell(c)).collect::<Vec<_>>().join(" | ")
            ));
        }
        self.block(&lines.join("\n"));
    }

    fn list(&mut self, items: &[String]) {
        let lines: Vec<String> = items.iter().map(|i| format!("- {i}")).collect();
        self.block(&lines.join("\n"));
    }
}

/// Indented plain text with padded columns
#[derive(Debug, Default)]
pub struct PlainTextRenderer {
    out: String,
    indent: usize,
}

impl PlainTextRenderer {
    pub fn finish(self) -> String {
        self.out
    }

    fn line(&mut self, text: &str) {
        if !text.is_empty() {
            self.out.push_str(&"  ".repeat(self.indent));
            self.out.push_str(text);
        }
        self.out.push('\n');
    }
}

impl LogVisitor for PlainTextRenderer {
    fn begin_document(&mut self, title: &str) {
        self.line(title);
        self.line(&"=".repeat(title.chars().count()));
    }

    fn begin_section(&mut self, title: &str, depth: usize) {
        self.indent = depth;
        self.line("");
        self.line(title);
        let underline = if depth == 0 { '-' } else { '~' };
        self.line(&underline.to_string().repeat(title.chars().count()));
        self.indent = depth + 1;
    }

    fn end_section(&mut self, depth: usize) {
        self.indent = depth;
    }

    fn paragraph(&mut self, text: &str) {
        for line in text.lines() {
            self.line(line);
        }
    }

    fn fields(&mut self, entries: &[(String, String)]) {
        let width = entries.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
        for (key, value) in entries {
            self.line(&format!("{key:<width$}  {value}"));
        }
    }

    fn table(&mut self, headers: &[String], rows: &[Vec<String>]) {
        let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }
        let format_row = |cells: &[String]| {
            cells
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{c:<w$}", w = *w))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };
        let header = format_row(headers);
        self.line(&header);
        let rule = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  ");
        self.line(&rule);
        for row in rows {
            let line = format_row(row);
            self.line(&line);
        }
    }

    fn list(&mut self, items: &[String]) {
        for item in items {
            self.line(&format!("* {item}"));
        }
    }
}

/// Builds a JSON value mirroring the document tree
#[derive(Debug, Default)]
pub struct JsonRenderer {
    title: String,
    stack: Vec<(String, Vec<Value>)>,
    sections: Vec<Value>,
}

impl JsonRenderer {
    pub fn finish(self) -> Value {
        json!({
            "title": self.title,
            "sections": self.sections,
        })
    }

    fn push(&mut self, value: Value) {
        if let Some((_, content)) = self.stack.last_mut() {
            content.push(value);
        }
    }
}

impl LogVisitor for JsonRenderer {
    fn begin_document(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn begin_section(&mut self, title: &str, _depth: usize) {
        self.stack.push((title.to_string(), Vec::new()));
    }

    fn end_section(&mut self, _depth: usize) {
        if let Some((title, content)) = self.stack.pop() {
            let section = json!({ "title": title, "content": content });
            if self.stack.is_empty() {
                self.sections.push(section);
            } else {
                self.push(section);
            }
        }
    }

    fn paragraph(&mut self, text: &str) {
        self.push(json!({ "paragraph": text }));
    }

    fn fields(&mut self, entries: &[(String, String)]) {
        let map: Map<String, Value> = entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.push(json!({ "fields": map }));
    }

    fn table(&mut self, headers: &[String], rows: &[Vec<String>]) {
        self.push(json!({ "table": { "headers": headers, "rows": rows } }));
    }

    fn list(&mut self, items: &[String]) {
        self.push(json!({ "list": items }));
    }
}
