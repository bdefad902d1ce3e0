//! Message personalization with a fixed placeholder set.
//!
//! Supported placeholders (English and legacy Portuguese spellings):
//! `{name}`/`{nome}`, `{phone}`/`{telefone}`, `{email}`.
//! Anything else in braces is left as written.

use crate::types::Lead;

/// Values available for substitution.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl TemplateContext {
    pub fn for_lead(lead: &Lead) -> Self {
        Self {
            name: Some(lead.name.clone()),
            phone: Some(lead.phone.clone()),
            email: lead.email.clone(),
        }
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        let value = match key {
            "name" | "nome" => self.name.as_deref(),
            "phone" | "telefone" => self.phone.as_deref(),
            "email" => self.email.as_deref(),
            _ => None,
        };
        value.filter(|v| !v.is_empty())
    }
}

/// Substitute known placeholders in `body`. Placeholders without a value
/// stay in the output untouched.
pub fn render_template(body: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match ctx.lookup(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext {
            name: Some("Maria".into()),
            phone: Some("11999990000".into()),
            email: None,
        }
    }

    #[test]
    fn test_substitutes_both_spellings() {
        let out = render_template("Olá {nome}! Hi {name}, we call {telefone}.", &ctx());
        assert_eq!(out, "Olá Maria! Hi Maria, we call 11999990000.");
    }

    #[test]
    fn test_unknown_and_missing_left_alone() {
        let out = render_template("{greeting} {email} {name}", &ctx());
        assert_eq!(out, "{greeting} {email} Maria");
    }

    #[test]
    fn test_unclosed_brace() {
        assert_eq!(render_template("price {name", &ctx()), "price {name");
        assert_eq!(render_template("no placeholders", &ctx()), "no placeholders");
    }
}
