//! Code splitter boundary.
//!
//! AST-grade splitting is an external collaborator; the service ships a
//! line-window splitter that keeps chunks inside the embedding context and
//! overlaps windows so definitions spanning a boundary stay searchable.

use serde::{Deserialize, Serialize};

/// A split of one file, carrying the text to embed and its line range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitChunk {
    pub content: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
}

/// Splitter selection from the `index_codebase` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitterKind {
    #[default]
    Ast,
    LangChain,
}

impl std::str::FromStr for SplitterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ast" => Ok(SplitterKind::Ast),
            "langchain" => Ok(SplitterKind::LangChain),
            other => Err(format!("unknown splitter '{other}' (expected ast|langchain)")),
        }
    }
}

pub trait Splitter: Send + Sync {
    fn split(&self, content: &str) -> Vec<SplitChunk>;
}

/// Line-window splitter: windows capped by character budget with a fixed
/// line overlap between consecutive chunks.
pub struct LineWindowSplitter {
    pub max_chars: usize,
    pub overlap_lines: usize,
}

impl Default for LineWindowSplitter {
    fn default() -> Self {
        Self { max_chars: 2_500, overlap_lines: 5 }
    }
}

impl Splitter for LineWindowSplitter {
    fn split(&self, content: &str) -> Vec<SplitChunk> {
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < lines.len() {
            let mut end = start;
            let mut size = 0usize;
            while end < lines.len() {
                let line_len = lines[end].len() + 1;
                if size + line_len > self.max_chars && end > start {
                    break;
                }
                size += line_len;
                end += 1;
            }

            let text = lines[start..end].join("\n");
            if !text.trim().is_empty() {
                chunks.push(SplitChunk {
                    content: text,
                    start_line: start + 1,
                    end_line: end,
                });
            }

            if end >= lines.len() {
                break;
            }
            // Overlap the next window so boundary-straddling code is covered
            // by both chunks.
            start = end.saturating_sub(self.overlap_lines).max(start + 1);
        }

        chunks
    }
}

/// Build the splitter for a requested kind. AST splitting is delegated to an
/// external collaborator when available; the line-window splitter is the
/// in-process implementation for both kinds.
pub fn splitter_for(_kind: SplitterKind) -> Box<dyn Splitter> {
    Box::new(LineWindowSplitter::default())
}

/// Language label for a file extension, stored with each chunk.
pub fn language_for_extension(ext: &str) -> &'static str {
    match ext.trim_start_matches('.') {
        "rs" => "rust",
        "go" => "go",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "mts" | "cts" => "typescript",
        "jsx" => "javascriptreact",
        "tsx" => "typescriptreact",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hxx" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "sh" | "bash" => "shell",
        "sql" => "sql",
        "md" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "html" => "html",
        "css" => "css",
        _ => "text",
    }
}

/// Default set of extensions included in an index scan.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "rs", "go", "py", "js", "mjs", "cjs", "ts", "mts", "cts", "jsx", "tsx", "java", "kt", "kts",
    "c", "h", "cc", "cpp", "cxx", "hpp", "hxx", "cs", "rb", "php", "swift", "scala", "sh", "sql",
    "md", "json", "yaml", "yml", "toml",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_files_become_one_chunk() {
        let splitter = LineWindowSplitter::default();
        let chunks = splitter.split("fn main() {\n    println!(\"hi\");\n}\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn long_files_split_with_overlap() {
        let splitter = LineWindowSplitter { max_chars: 200, overlap_lines: 2 };
        let content = (0..50).map(|i| format!("line number {i:04}")).collect::<Vec<_>>().join("\n");
        let chunks = splitter.split(&content);
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            // Consecutive windows overlap and never go backwards.
            assert!(pair[1].start_line > pair[0].start_line);
            assert!(pair[1].start_line <= pair[0].end_line + 1);
        }
        assert_eq!(chunks.last().unwrap().end_line, 50);
    }

    #[test]
    fn empty_and_blank_input_yield_nothing() {
        let splitter = LineWindowSplitter::default();
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("\n\n\n").is_empty());
    }

    #[test]
    fn chunk_line_ranges_match_content() {
        let splitter = LineWindowSplitter { max_chars: 40, overlap_lines: 1 };
        let content = "alpha\nbravo\ncharlie\ndelta\necho\nfoxtrot";
        let lines: Vec<&str> = content.lines().collect();
        for chunk in splitter.split(content) {
            let expected = lines[chunk.start_line - 1..chunk.end_line].join("\n");
            assert_eq!(chunk.content, expected);
        }
    }

    #[test]
    fn languages_map_from_extensions() {
        assert_eq!(language_for_extension("rs"), "rust");
        assert_eq!(language_for_extension(".ts"), "typescript");
        assert_eq!(language_for_extension("weird"), "text");
    }
}
