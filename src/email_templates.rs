//! Welcome email variants.
//!
//! Variant choice is a pure function of the recipient address and the template flags, so the
//! same inputs always produce the same email.

use crate::models::REQUIRED_CAMPAIGN_TAGS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateFlags {
    /// A/B split: Gmail recipients get the minimal variant, everyone else the rich one.
    pub ab_gmail_minimal: bool,
    /// Global minimal switch, consulted only when the A/B split is off.
    pub force_minimal: bool,
    /// Drop booking and site links from both variants.
    pub no_links: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Minimal,
    Rich,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Minimal => "minimal",
            Variant::Rich => "rich",
        }
    }
}

/// Which side of the A/B split a recipient fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbArm {
    GmailMinimal,
    NonGmailRich,
}

impl AbArm {
    pub fn tag(self) -> &'static str {
        match self {
            AbArm::GmailMinimal => "ab-gmail-minimal",
            AbArm::NonGmailRich => "ab-nongmail-rich",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantChoice {
    pub variant: Variant,
    pub ab_arm: Option<AbArm>,
}

impl VariantChoice {
    /// Provider tags for a message: the campaign tags, the variant, and the A/B arm if any.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = REQUIRED_CAMPAIGN_TAGS.iter().map(|t| t.to_string()).collect();
        tags.push(format!("variant-{}", self.variant.as_str()));
        if let Some(arm) = self.ab_arm {
            tags.push(arm.tag().to_string());
        }
        tags
    }
}

pub fn is_gmail_address(email: &str) -> bool {
    let domain = email
        .rsplit_once('@')
        .map(|(_, d)| d.trim().to_ascii_lowercase())
        .unwrap_or_default();
    domain == "gmail.com" || domain == "googlemail.com"
}

pub fn select_variant(recipient: &str, flags: &TemplateFlags) -> VariantChoice {
    if flags.ab_gmail_minimal {
        if is_gmail_address(recipient) {
            VariantChoice {
                variant: Variant::Minimal,
                ab_arm: Some(AbArm::GmailMinimal),
            }
        } else {
            VariantChoice {
                variant: Variant::Rich,
                ab_arm: Some(AbArm::NonGmailRich),
            }
        }
    } else if flags.force_minimal {
        VariantChoice {
            variant: Variant::Minimal,
            ab_arm: None,
        }
    } else {
        VariantChoice {
            variant: Variant::Rich,
            ab_arm: None,
        }
    }
}

/// Values interpolated into the templates.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub product_name: &'a str,
    pub sender_name: Option<&'a str>,
    pub site_url: &'a str,
    pub booking_url: Option<&'a str>,
    pub no_links: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub fn render_welcome(variant: Variant, ctx: &TemplateContext<'_>) -> RenderedEmail {
    match variant {
        Variant::Minimal => render_minimal(ctx),
        Variant::Rich => render_rich(ctx),
    }
}

fn signature(ctx: &TemplateContext<'_>) -> String {
    match ctx.sender_name {
        Some(name) => format!("{}\nFounder, {}", name, ctx.product_name),
        None => format!("The {} team", ctx.product_name),
    }
}

fn booking_link<'a>(ctx: &TemplateContext<'a>) -> Option<&'a str> {
    if ctx.no_links {
        None
    } else {
        ctx.booking_url
    }
}

fn render_minimal(ctx: &TemplateContext<'_>) -> RenderedEmail {
    let product = ctx.product_name;
    let subject = format!("Welcome to {} early access", product);

    let mut text = format!(
        "Hi there,\n\n\
         You're on the {product} early access list.\n\n\
         What to expect:\n\
         - An invite when we launch\n\
         - Early adopter pricing\n\
         - A say in what we build next\n\n\
         What's your biggest invoice headache today? Just hit reply.\n\n\
         Thanks,\n{}",
        signature(ctx),
    );
    if let Some(url) = booking_link(ctx) {
        text.push_str(&format!("\n\nP.S. Prefer to talk? Book a short call: {}", url));
    }

    let mut html = format!(
        "<div style=\"padding:16px;\"><div style=\"max-width:600px;margin:0 auto;\">\
         <p>Hi there,</p>\
         <p>You're on the {product} early access list.</p>\
         <p><strong>What to expect:</strong></p>\
         <ul><li>An invite when we launch</li><li>Early adopter pricing</li>\
         <li>A say in what we build next</li></ul>\
         <p>What's your biggest invoice headache today? Just hit reply.</p>\
         <p>Thanks,<br/>{}</p>",
        escape_html(&signature(ctx)).replace('\n', "<br/>"),
        product = escape_html(product),
    );
    if let Some(url) = booking_link(ctx) {
        html.push_str(&format!(
            "<p><em>P.S. Prefer to talk? <a href=\"{}\">Book a short call</a>.</em></p>",
            escape_html(url)
        ));
    }
    html.push_str("</div></div>");

    RenderedEmail {
        subject,
        html,
        text,
    }
}

fn render_rich(ctx: &TemplateContext<'_>) -> RenderedEmail {
    let product = ctx.product_name;
    let subject = format!("Welcome to {} early access 🎉", product);

    let mut text = format!(
        "Hi there,\n\n\
         You're officially on the {product} early access list. Welcome aboard!\n\n\
         Here's what you can expect:\n\
         ✓ Early access invite: you'll be among the first in when we launch\n\
         ✓ Lifetime discount: early adopters get special pricing\n\
         ✓ Product input: your feedback shapes what we prioritize\n\n\
         Quick question: what's the biggest invoice-related headache you deal with today? \
         Just hit reply and let us know.\n\n\
         Thanks for your interest,\n{}",
        signature(ctx),
    );
    if let Some(url) = booking_link(ctx) {
        text.push_str(&format!(
            "\n\nP.S. If you'd prefer to chat live, grab a 15-minute slot here: {}",
            url
        ));
    }
    if !ctx.no_links {
        text.push_str(&format!("\n\n{}\n{}", product, ctx.site_url));
    }

    let mut html = format!(
        "<div style=\"background:#f6f9fc;padding:24px;\">\
         <div style=\"max-width:600px;margin:0 auto;background:#ffffff;border-radius:12px;\">\
         <div style=\"padding:24px;\">\
         <h1 style=\"font-size:24px;\">Welcome to {product} early access 🎉</h1>\
         <p>Hi there,</p>\
         <p>You're officially on the <strong>{product} early access</strong> list. Welcome aboard!</p>\
         <p><strong>Here's what you can expect:</strong></p>\
         <ul style=\"list-style:none;padding-left:0;\">\
         <li>✓ <strong>Early access invite</strong>: you'll be among the first in when we launch</li>\
         <li>✓ <strong>Lifetime discount</strong>: early adopters get special pricing</li>\
         <li>✓ <strong>Product input</strong>: your feedback shapes what we prioritize</li></ul>\
         <p><strong>Quick question:</strong> what's the biggest invoice-related headache you deal with today? \
         Just hit reply and let us know.</p>\
         <p>Thanks for your interest,<br/>{}</p>",
        escape_html(&signature(ctx)).replace('\n', "<br/>"),
        product = escape_html(product),
    );
    if let Some(url) = booking_link(ctx) {
        html.push_str(&format!(
            "<div style=\"text-align:center;margin:16px 0;\"><a href=\"{}\" \
             style=\"display:inline-block;padding:12px 18px;background:#2563eb;color:#ffffff;\
             text-decoration:none;border-radius:8px;\">Book a 15-min call</a></div>",
            escape_html(url)
        ));
    }
    html.push_str("</div>");
    if !ctx.no_links {
        html.push_str(&format!(
            "<div style=\"padding:20px 24px;background:#f8fafc;text-align:center;font-size:12px;\">\
             <a href=\"{url}\">{url}</a></div>",
            url = escape_html(ctx.site_url)
        ));
    }
    html.push_str("</div></div>");

    RenderedEmail {
        subject,
        html,
        text,
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(no_links: bool) -> TemplateContext<'static> {
        TemplateContext {
            product_name: "InvoiceQA",
            sender_name: Some("Sam Founder"),
            site_url: "https://invoiceqa.com",
            booking_url: Some("https://cal.example/intro"),
            no_links,
        }
    }

    #[test]
    fn test_ab_split_by_domain() {
        let flags = TemplateFlags {
            ab_gmail_minimal: true,
            force_minimal: false,
            no_links: false,
        };
        let gmail = select_variant("someone@Gmail.com", &flags);
        assert_eq!(gmail.variant, Variant::Minimal);
        assert_eq!(gmail.ab_arm, Some(AbArm::GmailMinimal));

        let googlemail = select_variant("someone@googlemail.com", &flags);
        assert_eq!(googlemail.variant, Variant::Minimal);

        let corp = select_variant("cfo@acme.io", &flags);
        assert_eq!(corp.variant, Variant::Rich);
        assert_eq!(corp.ab_arm, Some(AbArm::NonGmailRich));
    }

    #[test]
    fn test_ab_takes_precedence_over_force_minimal() {
        let flags = TemplateFlags {
            ab_gmail_minimal: true,
            force_minimal: true,
            no_links: false,
        };
        assert_eq!(select_variant("cfo@acme.io", &flags).variant, Variant::Rich);
    }

    #[test]
    fn test_force_minimal_without_ab() {
        let flags = TemplateFlags {
            force_minimal: true,
            ..Default::default()
        };
        let choice = select_variant("cfo@acme.io", &flags);
        assert_eq!(choice.variant, Variant::Minimal);
        assert_eq!(choice.ab_arm, None);
    }

    #[test]
    fn test_default_is_rich() {
        let choice = select_variant("someone@gmail.com", &TemplateFlags::default());
        assert_eq!(choice.variant, Variant::Rich);
    }

    #[test]
    fn test_gmail_lookalikes_are_not_gmail() {
        assert!(!is_gmail_address("x@gmail.com.evil.io"));
        assert!(!is_gmail_address("x@notgmail.com"));
        assert!(!is_gmail_address("gmail.com"));
    }

    #[test]
    fn test_tags_include_campaign_and_variant() {
        let choice = VariantChoice {
            variant: Variant::Minimal,
            ab_arm: Some(AbArm::GmailMinimal),
        };
        assert_eq!(
            choice.tags(),
            vec!["landing-page", "welcome-email", "variant-minimal", "ab-gmail-minimal"]
        );
    }

    #[test]
    fn test_no_links_removes_urls() {
        for variant in [Variant::Minimal, Variant::Rich] {
            let email = render_welcome(variant, &ctx(true));
            assert!(!email.text.contains("https://"), "{:?} text has a link", variant);
            assert!(!email.html.contains("href"), "{:?} html has a link", variant);
        }
    }

    #[test]
    fn test_links_present_by_default() {
        let email = render_welcome(Variant::Rich, &ctx(false));
        assert!(email.text.contains("https://cal.example/intro"));
        assert!(email.html.contains("https://invoiceqa.com"));
        assert!(email.subject.contains("InvoiceQA"));
    }

    #[test]
    fn test_signature_falls_back_to_team() {
        let mut context = ctx(false);
        context.sender_name = None;
        let email = render_welcome(Variant::Minimal, &context);
        assert!(email.text.contains("The InvoiceQA team"));
    }
}
