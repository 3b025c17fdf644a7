//! Leading-keyword SQL classification.
//!
//! Uses the sqlparser-rs tokenizer (not its parser) to skip whitespace and
//! comments, then classifies the query by its first keyword. This is a bounded
//! heuristic: a CTE that hides a data-modifying statement, a multi-statement
//! batch or a procedure call is classified by its first keyword only.

use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};

use super::{SafetyClass, SafetyVerdict};

/// SQL classifier that inspects the leading keyword of a query.
#[derive(Debug, Default)]
pub struct SqlClassifier {
    dialect: GenericDialect,
}

impl SqlClassifier {
    /// Creates a new SQL classifier.
    pub fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }

    /// Classifies a SQL string.
    ///
    /// Queries that cannot be tokenized, are empty, or start with an
    /// unrecognized keyword are treated as destructive.
    pub fn classify(&self, sql: &str) -> SafetyVerdict {
        let tokens = match Tokenizer::new(&self.dialect, sql).tokenize() {
            Ok(tokens) => tokens,
            Err(e) => {
                return SafetyVerdict::unrecognized(
                    None,
                    format!("Could not read SQL ({e}). Please review carefully."),
                )
            }
        };

        let Some(keyword) = leading_keyword(&tokens) else {
            return SafetyVerdict::unrecognized(None, "Empty SQL statement");
        };

        match keyword_class(&keyword) {
            Some(class) => SafetyVerdict::new(class, keyword),
            None => SafetyVerdict::unrecognized(
                Some(keyword),
                "Unrecognized statement. Please review carefully.",
            ),
        }
    }
}

/// Convenience function to classify SQL without creating a classifier instance.
pub fn classify_sql(sql: &str) -> SafetyVerdict {
    SqlClassifier::new().classify(sql)
}

/// Returns the first word token, upper-cased, skipping whitespace, comments,
/// opening parentheses and stray semicolons.
fn leading_keyword(tokens: &[Token]) -> Option<String> {
    for token in tokens {
        match token {
            Token::Whitespace(
                Whitespace::Space
                | Whitespace::Newline
                | Whitespace::Tab
                | Whitespace::SingleLineComment { .. }
                | Whitespace::MultiLineComment(_),
            )
            | Token::LParen
            | Token::SemiColon => continue,
            Token::Word(word) if word.quote_style.is_none() => {
                return Some(word.value.to_ascii_uppercase());
            }
            _ => return None,
        }
    }
    None
}

fn keyword_class(keyword: &str) -> Option<SafetyClass> {
    let class = match keyword {
        "SELECT" | "EXPLAIN" | "SHOW" | "WITH" | "DESCRIBE" | "DESC" | "VALUES" => {
            SafetyClass::SafeRead
        }
        "INSERT" | "UPDATE" | "MERGE" | "UPSERT" | "REPLACE" => SafetyClass::Mutating,
        "CREATE" | "ALTER" | "RENAME" | "COMMENT" | "GRANT" | "REVOKE" => {
            SafetyClass::SchemaChange
        }
        "DROP" | "TRUNCATE" | "DELETE" => SafetyClass::Destructive,
        _ => return None,
    };
    Some(class)
}
