//! Classic template: centered hero, contract box, link buttons.

use super::{escape_html, js_string, paragraphs, SiteBundle, SiteContent};

const CSS: &str = r#"* { box-sizing: border-box; margin: 0; padding: 0; }
body {
  font-family: "Trebuchet MS", Arial, sans-serif;
  background: #0f0f14;
  color: #f2f2f2;
  min-height: 100vh;
  display: flex;
  flex-direction: column;
  align-items: center;
}
.hero { text-align: center; padding: 72px 24px 32px; max-width: 760px; }
.logo { width: 160px; height: 160px; border-radius: 50%; border: 4px solid __ACCENT__; object-fit: cover; }
h1 { font-size: 3rem; margin-top: 24px; }
.ticker { color: __ACCENT__; font-size: 1.5rem; font-weight: bold; letter-spacing: 2px; }
.about p { margin-top: 16px; line-height: 1.6; color: #c9c9d1; }
.contract {
  margin-top: 32px;
  display: flex;
  gap: 8px;
  align-items: center;
  background: #1b1b24;
  border: 1px solid #2c2c3a;
  border-radius: 12px;
  padding: 12px 16px;
}
.contract code { font-size: 0.9rem; word-break: break-all; }
.contract button, .links a {
  background: __ACCENT__;
  color: #0f0f14;
  border: none;
  border-radius: 8px;
  padding: 10px 18px;
  font-weight: bold;
  cursor: pointer;
  text-decoration: none;
}
.links { margin-top: 32px; display: flex; gap: 12px; justify-content: center; flex-wrap: wrap; }
footer { margin-top: auto; padding: 24px; color: #6d6d7a; font-size: 0.85rem; }
"#;

const JS: &str = r#"(function () {
  var button = document.getElementById("copy-contract");
  if (!button) return;
  button.addEventListener("click", function () {
    navigator.clipboard.writeText(CONTRACT).then(function () {
      button.textContent = "Copied!";
      setTimeout(function () { button.textContent = "Copy"; }, 1500);
    });
  });
})();
"#;

pub(super) fn render(content: &SiteContent) -> SiteBundle {
    let name = escape_html(content.coin_name.trim());
    let ticker = escape_html(&content.display_ticker());

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("  <meta charset=\"utf-8\">\n");
    html.push_str("  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!("  <title>{} ({})</title>\n", name, ticker));
    html.push_str("  <link rel=\"stylesheet\" href=\"styles.css\">\n</head>\n<body>\n");
    html.push_str("  <section class=\"hero\">\n");
    if let Some(logo) = &content.logo_url {
        html.push_str(&format!(
            "    <img class=\"logo\" src=\"{}\" alt=\"{} logo\">\n",
            escape_html(logo.trim()),
            name
        ));
    }
    html.push_str(&format!("    <h1>{}</h1>\n", name));
    html.push_str(&format!("    <div class=\"ticker\">{}</div>\n", ticker));

    let about = paragraphs(&content.description);
    if !about.is_empty() {
        html.push_str("    <div class=\"about\">\n");
        for p in about {
            html.push_str(&format!("      <p>{}</p>\n", p));
        }
        html.push_str("    </div>\n");
    }

    if let Some(contract) = &content.contract_address {
        html.push_str("    <div class=\"contract\">\n");
        html.push_str(&format!("      <code>{}</code>\n", escape_html(contract.trim())));
        html.push_str("      <button id=\"copy-contract\" type=\"button\">Copy</button>\n");
        html.push_str("    </div>\n");
    }

    let links = content.links();
    if !links.is_empty() {
        html.push_str("    <nav class=\"links\">\n");
        for (label, url) in links {
            html.push_str(&format!(
                "      <a href=\"{}\" target=\"_blank\" rel=\"noopener\">{}</a>\n",
                escape_html(url.trim()),
                label
            ));
        }
        html.push_str("    </nav>\n");
    }
    html.push_str("  </section>\n");
    html.push_str(&format!("  <footer>{} is a community token. Not financial advice.</footer>\n", name));
    html.push_str("  <script src=\"script.js\"></script>\n</body>\n</html>\n");

    let contract = content.contract_address.as_deref().map(str::trim).unwrap_or("");
    let js = format!("var CONTRACT = {};\n{}", js_string(contract), JS);

    SiteBundle {
        html,
        css: CSS.replace("__ACCENT__", &content.accent_color),
        js,
    }
}
