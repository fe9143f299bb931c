use crate::domain::Article;

/// Evaluates a query feed's stored expression against one article.
///
/// The expression language is deliberately small; anything richer can
/// be plugged in through this trait without touching the repository.
pub trait QueryEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, article: &Article) -> bool;
}

/// Built-in evaluator for conjunctions of simple clauses:
///
/// ```text
/// read == false
/// title contains "rust"
/// summary contains "release"
/// content contains "async"
/// flags contains "starred"
/// read == false && flags contains "starred"
/// ```
///
/// Malformed clauses match nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEvaluator;

impl SimpleEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn clause_matches(clause: &str, article: &Article) -> bool {
        let clause = clause.trim();
        if let Some(rest) = clause.strip_prefix("read ==") {
            return match rest.trim() {
                "true" => article.read(),
                "false" => !article.read(),
                _ => false,
            };
        }
        if let Some((field, needle)) = parse_contains(clause) {
            return match field {
                "title" => contains_ignore_case(article.title(), needle),
                "summary" => contains_ignore_case(article.summary(), needle),
                "content" => contains_ignore_case(article.content(), needle),
                "flags" => article.flags().iter().any(|f| f == needle),
                _ => false,
            };
        }
        tracing::warn!(clause, "unrecognized query clause");
        false
    }
}

impl QueryEvaluator for SimpleEvaluator {
    fn evaluate(&self, expression: &str, article: &Article) -> bool {
        let expression = expression.trim();
        if expression.is_empty() {
            return false;
        }
        expression
            .split("&&")
            .all(|clause| Self::clause_matches(clause, article))
    }
}

/// Splits `<field> contains "<needle>"` into its parts.
fn parse_contains(clause: &str) -> Option<(&str, &str)> {
    let (field, rest) = clause.split_once(" contains ")?;
    let needle = rest.trim().strip_prefix('"')?.strip_suffix('"')?;
    Some((field.trim(), needle))
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> Article {
        let mut article = Article::new();
        article.set_title("Announcing Rust 1.80");
        article.set_summary("A new release");
        article.set_content("Lots of async improvements");
        article.add_flag("starred");
        article
    }

    #[test]
    fn test_read_clause() {
        let evaluator = SimpleEvaluator::new();
        let mut article = article();
        assert!(evaluator.evaluate("read == false", &article));
        assert!(!evaluator.evaluate("read == true", &article));

        article.set_read(true);
        assert!(evaluator.evaluate("read == true", &article));
    }

    #[test]
    fn test_contains_clauses() {
        let evaluator = SimpleEvaluator::new();
        let article = article();
        assert!(evaluator.evaluate(r#"title contains "rust""#, &article));
        assert!(evaluator.evaluate(r#"content contains "async""#, &article));
        assert!(evaluator.evaluate(r#"flags contains "starred""#, &article));
        assert!(!evaluator.evaluate(r#"flags contains "Starred""#, &article));
        assert!(!evaluator.evaluate(r#"title contains "python""#, &article));
    }

    #[test]
    fn test_conjunction() {
        let evaluator = SimpleEvaluator::new();
        let article = article();
        assert!(evaluator.evaluate(r#"read == false && title contains "rust""#, &article));
        assert!(!evaluator.evaluate(r#"read == true && title contains "rust""#, &article));
    }

    #[test]
    fn test_malformed_expression_matches_nothing() {
        let evaluator = SimpleEvaluator::new();
        let article = article();
        assert!(!evaluator.evaluate("", &article));
        assert!(!evaluator.evaluate("published after yesterday", &article));
        assert!(!evaluator.evaluate(r#"title contains unquoted"#, &article));
    }
}
