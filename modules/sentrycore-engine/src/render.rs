//! Email rendering: HTML + plain-text bodies with click-redirector links.

use sentrycore_common::types::Goal;
use uuid::Uuid;

/// One line of an outgoing email.
#[derive(Debug, Clone)]
pub struct EmailItem {
    pub item_id: Uuid,
    pub goal_id: Uuid,
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,
    pub source_name: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

pub struct EmailRenderer {
    public_base_url: String,
}

impl EmailRenderer {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        let mut base = public_base_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            public_base_url: base,
        }
    }

    /// Links go through the redirector so clicks land as ClickEvent rows.
    pub fn redirect_url(&self, item_id: Uuid, goal_id: Uuid) -> String {
        format!(
            "{}/r?item={item_id}&goal={goal_id}&c=EMAIL",
            self.public_base_url
        )
    }

    pub fn render_immediate(&self, goal: &Goal, items: &[EmailItem]) -> RenderedEmail {
        let subject = if items.len() == 1 {
            format!("[SentryCore] {} — {}", goal.name, items[0].title)
        } else {
            format!("[SentryCore] {} — {} new matches", goal.name, items.len())
        };
        self.render_list(goal, &subject, "Immediate matches for your goal", items)
    }

    pub fn render_batch(&self, goal: &Goal, items: &[EmailItem]) -> RenderedEmail {
        let subject = format!("[SentryCore] {} — {} batched matches", goal.name, items.len());
        self.render_list(goal, &subject, "Matches since the last batch window", items)
    }

    pub fn render_digest(&self, goal: &Goal, items: &[EmailItem]) -> RenderedEmail {
        let subject = format!("[SentryCore] Daily digest — {}", goal.name);
        self.render_list(goal, &subject, "Your daily digest", items)
    }

    fn render_list(
        &self,
        goal: &Goal,
        subject: &str,
        heading: &str,
        items: &[EmailItem],
    ) -> RenderedEmail {
        let mut html = String::new();
        html.push_str("<html><body>");
        html.push_str(&format!(
            "<h2>{} — {}</h2>",
            escape_html(heading),
            escape_html(&goal.name)
        ));
        html.push_str("<ul>");
        for item in items {
            let link = self.redirect_url(item.item_id, item.goal_id);
            html.push_str(&format!(
                "<li><a href=\"{link}\">{}</a> <small>({})</small>",
                escape_html(&item.title),
                escape_html(&item.source_name),
            ));
            if let Some(snippet) = &item.snippet {
                html.push_str(&format!("<br/><span>{}</span>", escape_html(snippet)));
            }
            html.push_str("</li>");
        }
        html.push_str("</ul></body></html>");

        let mut text = String::new();
        text.push_str(&format!("{heading} — {}\n\n", goal.name));
        for item in items {
            text.push_str(&format!(
                "- {} ({})\n  {}\n",
                item.title,
                item.source_name,
                self.redirect_url(item.item_id, item.goal_id)
            ));
        }

        RenderedEmail {
            subject: subject.to_string(),
            html_body: html,
            text_body: text,
        }
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str) -> EmailItem {
        EmailItem {
            item_id: Uuid::new_v4(),
            goal_id: Uuid::new_v4(),
            title: title.to_string(),
            url: "https://example.com/x".to_string(),
            snippet: Some("a <b>snippet</b>".to_string()),
            source_name: "Example Feed".to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn links_go_through_redirector() {
        let renderer = EmailRenderer::new("https://sentry.example.com/");
        let goal = Goal::new(Uuid::new_v4(), "Rust news", "rust releases");
        let it = item("A story");
        let rendered = renderer.render_immediate(&goal, std::slice::from_ref(&it));

        let expected = format!(
            "https://sentry.example.com/r?item={}&goal={}&c=EMAIL",
            it.item_id, it.goal_id
        );
        assert!(rendered.html_body.contains(&expected));
        assert!(rendered.text_body.contains(&expected));
        // The raw article URL never appears directly.
        assert!(!rendered.html_body.contains("https://example.com/x"));
    }

    #[test]
    fn single_item_subject_carries_title() {
        let renderer = EmailRenderer::new("http://localhost:8000");
        let goal = Goal::new(Uuid::new_v4(), "Rust news", "d");
        let rendered = renderer.render_immediate(&goal, &[item("Big release")]);
        assert_eq!(rendered.subject, "[SentryCore] Rust news — Big release");
    }

    #[test]
    fn html_is_escaped() {
        let renderer = EmailRenderer::new("http://localhost:8000");
        let goal = Goal::new(Uuid::new_v4(), "g", "d");
        let rendered = renderer.render_digest(&goal, &[item("<script>bad</script>")]);
        assert!(!rendered.html_body.contains("<script>"));
        assert!(rendered.html_body.contains("&lt;script&gt;"));
    }

    #[test]
    fn multipart_bodies_both_render() {
        let renderer = EmailRenderer::new("http://localhost:8000");
        let goal = Goal::new(Uuid::new_v4(), "g", "d");
        let rendered = renderer.render_batch(&goal, &[item("One"), item("Two")]);
        assert!(rendered.html_body.contains("<ul>"));
        assert!(rendered.text_body.contains("- One"));
        assert!(rendered.text_body.contains("- Two"));
        assert!(rendered.subject.contains("2 batched"));
    }
}
