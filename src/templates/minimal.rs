//! Minimal template: light single column, no logo animation.

use super::{escape_html, js_string, paragraphs, SiteBundle, SiteContent};

const CSS: &str = r#"body {
  font-family: Georgia, "Times New Roman", serif;
  background: #fafafa;
  color: #1d1d1f;
  max-width: 620px;
  margin: 0 auto;
  padding: 64px 20px;
}
header { display: flex; align-items: center; gap: 16px; }
header img { width: 56px; height: 56px; border-radius: 12px; }
h1 { font-size: 2.2rem; font-weight: normal; }
h1 span { color: __ACCENT__; }
p { line-height: 1.7; margin: 18px 0; }
.ca { font-family: monospace; font-size: 0.85rem; background: #eee; padding: 8px; word-break: break-all; }
ul { list-style: none; padding: 0; display: flex; gap: 20px; }
a { color: __ACCENT__; }
"#;

const JS: &str = r#"document.querySelectorAll("[data-copy]").forEach(function (el) {
  el.addEventListener("click", function () {
    navigator.clipboard.writeText(CONTRACT);
    el.title = "Copied";
  });
});
"#;

pub(super) fn render(content: &SiteContent) -> SiteBundle {
    let name = escape_html(content.coin_name.trim());
    let ticker = escape_html(&content.display_ticker());

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!("<title>{}</title>\n", name));
    html.push_str("<link rel=\"stylesheet\" href=\"styles.css\">\n</head>\n<body>\n<header>\n");
    if let Some(logo) = &content.logo_url {
        html.push_str(&format!("  <img src=\"{}\" alt=\"\">\n", escape_html(logo.trim())));
    }
    html.push_str(&format!("  <h1>{} <span>{}</span></h1>\n</header>\n", name, ticker));

    for p in paragraphs(&content.description) {
        html.push_str(&format!("<p>{}</p>\n", p));
    }
    if let Some(contract) = &content.contract_address {
        html.push_str(&format!(
            "<p class=\"ca\" data-copy>{}</p>\n",
            escape_html(contract.trim())
        ));
    }

    let links = content.links();
    if !links.is_empty() {
        html.push_str("<ul>\n");
        for (label, url) in links {
            html.push_str(&format!("  <li><a href=\"{}\">{}</a></li>\n", escape_html(url.trim()), label));
        }
        html.push_str("</ul>\n");
    }
    html.push_str("<script src=\"script.js\"></script>\n</body>\n</html>\n");

    let contract = content.contract_address.as_deref().map(str::trim).unwrap_or("");

    SiteBundle {
        html,
        css: CSS.replace("__ACCENT__", &content.accent_color),
        js: format!("var CONTRACT = {};\n{}", js_string(contract), JS),
    }
}
