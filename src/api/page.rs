//! Server-side rendering of the chat page

use crate::conversation::Message;
use std::fmt::Write;

const MESSAGES_SLOT: &str = "{{messages}}";
const MODELS_SLOT: &str = "{{model_options}}";

/// Fill the page template with the conversation and the model selector
pub fn render_page(template: &str, messages: &[Message], models: &[String], selected: &str) -> String {
    let mut rendered_messages = String::new();
    for message in messages {
        let _ = writeln!(
            rendered_messages,
            r#"<div class="message {role}"><span class="role">{role}</span><div class="content">{content}</div></div>"#,
            role = message.role.as_str(),
            content = escape_html(&message.content),
        );
    }

    let mut options = String::new();
    let selected_listed = models.iter().any(|m| m == selected);
    let listed = models
        .iter()
        .map(String::as_str)
        .chain((!selected_listed).then_some(selected));
    for model in listed {
        let attr = if model == selected { " selected" } else { "" };
        let _ = writeln!(
            options,
            r#"<option value="{value}"{attr}>{value}</option>"#,
            value = escape_html(model),
        );
    }

    template
        .replace(MODELS_SLOT, &options)
        .replace(MESSAGES_SLOT, &rendered_messages)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
