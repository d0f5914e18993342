//! Term normalization and matching / 搜索词标准化与匹配
//!
//! Matching is case-insensitive substring matching of either the whole term
//! or any whitespace-separated token of it / 不区分大小写的子串匹配

/// Tokenize text into lowercase whitespace-separated tokens / 按空白分词并转小写
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let lower = word.to_lowercase();
        if !tokens.contains(&lower) {
            tokens.push(lower);
        }
    }
    tokens
}

/// Normalize text (for exact matching) / 标准化文本
/// - Convert to lowercase / 转小写
/// - Remove extra whitespace / 去除多余空白
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prepared search term / 预处理后的搜索词
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    full: String,
    tokens: Vec<String>,
}

impl QueryTerm {
    /// `None` for blank terms / 空白搜索词返回 None
    pub fn parse(term: &str) -> Option<Self> {
        let full = normalize(term);
        if full.is_empty() {
            return None;
        }
        let tokens = tokenize(&full);
        Some(Self { full, tokens })
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        lower.contains(&self.full) || self.tokens.iter().any(|t| lower.contains(t.as_str()))
    }

    pub fn is_exact(&self, text: &str) -> bool {
        normalize(text) == self.full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_english() {
        let tokens = tokenize("Hello World hello Test");
        assert_eq!(tokens, vec!["hello", "world", "test"]);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Car   Audi "), "car audi");
        assert_eq!(normalize("\t"), "");
    }

    #[test]
    fn test_term_matching() {
        let term = QueryTerm::parse(" CAR ").unwrap();
        assert!(term.matches("car1"));
        assert!(term.matches("Cars"));
        assert!(!term.matches("othername2"));
        assert!(!term.matches(""));
        assert!(term.is_exact("Car"));
        assert!(!term.is_exact("car1"));
    }

    #[test]
    fn test_term_matches_any_token() {
        let term = QueryTerm::parse("luna audi").unwrap();
        assert!(term.matches("Luna"));
        assert!(term.matches("an audi"));
        assert!(!term.matches("bmw"));
        assert!(QueryTerm::parse("   ").is_none());
    }

    #[test]
    fn test_term_unicode() {
        let term = QueryTerm::parse("测试").unwrap();
        assert!(term.matches("测试文件"));
    }
}
