//! Redis 风格的 glob 匹配（`*`、`?`、`[...]`、`\` 转义），编译为正则

use regex::Regex;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct GlobPattern {
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut out = String::with_capacity(pattern.len() * 2 + 2);
        out.push('^');

        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                '\\' => match chars.next() {
                    Some(next) => out.push_str(&regex::escape(&next.to_string())),
                    None => out.push_str(r"\\"),
                },
                '[' => {
                    let mut class = String::new();
                    let mut closed = false;
                    if chars.peek() == Some(&'^') || chars.peek() == Some(&'!') {
                        chars.next();
                        class.push('^');
                    }
                    while let Some(inner) = chars.next() {
                        match inner {
                            ']' => {
                                closed = true;
                                break;
                            }
                            '\\' => {
                                if let Some(escaped) = chars.next() {
                                    class.push_str(&regex::escape(&escaped.to_string()));
                                }
                            }
                            '[' | '&' | '~' => {
                                class.push('\\');
                                class.push(inner);
                            }
                            other => class.push(other),
                        }
                    }
                    if closed && !class.is_empty() && class != "^" {
                        out.push('[');
                        out.push_str(&class);
                        out.push(']');
                    } else {
                        // 未闭合的 `[` 按字面量处理
                        out.push_str(r"\[");
                        out.push_str(&regex::escape(&class));
                    }
                }
                other => out.push_str(&regex::escape(&other.to_string())),
            }
        }

        out.push('$');
        let regex = Regex::new(&format!("(?s){}", out))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, field: &str) -> bool {
        self.regex.is_match(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_and_question() {
        let glob = GlobPattern::new("1.attribute.*.i").unwrap();
        assert!(glob.matches("1.attribute.size.i"));
        assert!(glob.matches("1.attribute.5.i"));
        assert!(!glob.matches("1.attribute.size.e"));
        assert!(!glob.matches("11.attribute.size.i"));

        let glob = GlobPattern::new("1.?.x").unwrap();
        assert!(glob.matches("1.a.x"));
        assert!(!glob.matches("1.ab.x"));
    }

    #[test]
    fn test_character_class_and_escape() {
        let glob = GlobPattern::new("2.carrier.[ud]*.i").unwrap();
        assert!(glob.matches("2.carrier.ups.i"));
        assert!(glob.matches("2.carrier.dhl.i"));
        assert!(!glob.matches("2.carrier.fedex.i"));

        let glob = GlobPattern::new(r"a\*b").unwrap();
        assert!(glob.matches("a*b"));
        assert!(!glob.matches("axxb"));
    }
}
