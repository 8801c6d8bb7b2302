//! Neon template: dark grid background, glowing headline, floating coin.

use super::{escape_html, js_string, paragraphs, SiteBundle, SiteContent};

const CSS: &str = r#"* { box-sizing: border-box; margin: 0; padding: 0; }
html, body { height: 100%; }
body {
  font-family: "Courier New", monospace;
  color: #e8fbff;
  background-color: #05010d;
  background-image:
    linear-gradient(rgba(255,255,255,0.04) 1px, transparent 1px),
    linear-gradient(90deg, rgba(255,255,255,0.04) 1px, transparent 1px);
  background-size: 40px 40px;
  overflow-x: hidden;
}
#sparks { position: fixed; inset: 0; pointer-events: none; }
main { position: relative; max-width: 900px; margin: 0 auto; padding: 96px 24px; }
.coin {
  width: 180px; height: 180px; border-radius: 50%;
  box-shadow: 0 0 40px __ACCENT__;
  animation: float 4s ease-in-out infinite;
}
@keyframes float { 0%, 100% { transform: translateY(0); } 50% { transform: translateY(-16px); } }
h1 {
  font-size: 4rem;
  text-transform: uppercase;
  color: __ACCENT__;
  text-shadow: 0 0 8px __ACCENT__, 0 0 24px __ACCENT__;
  margin-top: 32px;
}
.ticker { font-size: 1.4rem; margin-top: 8px; opacity: 0.85; }
.about p { margin-top: 20px; line-height: 1.7; max-width: 640px; }
.contract {
  margin-top: 40px; padding: 14px 18px;
  border: 1px solid __ACCENT__;
  box-shadow: inset 0 0 12px rgba(255,255,255,0.08);
  cursor: pointer; word-break: break-all;
}
.contract small { display: block; opacity: 0.6; margin-bottom: 6px; }
.links { margin-top: 40px; display: flex; gap: 16px; flex-wrap: wrap; }
.links a {
  color: __ACCENT__; border: 2px solid __ACCENT__;
  padding: 10px 22px; text-decoration: none; text-transform: uppercase;
  transition: background 0.2s, color 0.2s;
}
.links a:hover { background: __ACCENT__; color: #05010d; }
"#;

const JS: &str = r#"(function () {
  var box = document.getElementById("contract");
  if (box && CONTRACT) {
    box.addEventListener("click", function () {
      navigator.clipboard.writeText(CONTRACT);
      box.classList.add("copied");
      box.querySelector("small").textContent = "copied to clipboard";
    });
  }
  var canvas = document.getElementById("sparks");
  if (!canvas || !canvas.getContext) return;
  var ctx = canvas.getContext("2d");
  var sparks = [];
  function resize() { canvas.width = window.innerWidth; canvas.height = window.innerHeight; }
  window.addEventListener("resize", resize);
  resize();
  for (var i = 0; i < 60; i++) {
    sparks.push({ x: Math.random() * canvas.width, y: Math.random() * canvas.height, v: 0.3 + Math.random() });
  }
  (function frame() {
    ctx.clearRect(0, 0, canvas.width, canvas.height);
    ctx.fillStyle = ACCENT;
    sparks.forEach(function (s) {
      s.y -= s.v;
      if (s.y < 0) { s.y = canvas.height; s.x = Math.random() * canvas.width; }
      ctx.fillRect(s.x, s.y, 2, 2);
    });
    requestAnimationFrame(frame);
  })();
})();
"#;

pub(super) fn render(content: &SiteContent) -> SiteBundle {
    let name = escape_html(content.coin_name.trim());
    let ticker = escape_html(&content.display_ticker());

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!("<title>{} | {}</title>\n", ticker, name));
    html.push_str("<link rel=\"stylesheet\" href=\"styles.css\">\n</head>\n<body>\n");
    html.push_str("<canvas id=\"sparks\"></canvas>\n<main>\n");
    if let Some(logo) = &content.logo_url {
        html.push_str(&format!(
            "  <img class=\"coin\" src=\"{}\" alt=\"{}\">\n",
            escape_html(logo.trim()),
            ticker
        ));
    }
    html.push_str(&format!("  <h1>{}</h1>\n", name));
    html.push_str(&format!("  <p class=\"ticker\">{}</p>\n", ticker));

    let about = paragraphs(&content.description);
    if !about.is_empty() {
        html.push_str("  <div class=\"about\">\n");
        for p in about {
            html.push_str(&format!("    <p>{}</p>\n", p));
        }
        html.push_str("  </div>\n");
    }

    if let Some(contract) = &content.contract_address {
        html.push_str(&format!(
            "  <div id=\"contract\" class=\"contract\"><small>contract address, click to copy</small>{}</div>\n",
            escape_html(contract.trim())
        ));
    }

    let links = content.links();
    if !links.is_empty() {
        html.push_str("  <div class=\"links\">\n");
        for (label, url) in links {
            html.push_str(&format!(
                "    <a href=\"{}\" target=\"_blank\" rel=\"noopener\">{}</a>\n",
                escape_html(url.trim()),
                label
            ));
        }
        html.push_str("  </div>\n");
    }
    html.push_str("</main>\n<script src=\"script.js\"></script>\n</body>\n</html>\n");

    let contract = content.contract_address.as_deref().map(str::trim).unwrap_or("");
    let js = format!(
        "var CONTRACT = {};\nvar ACCENT = {};\n{}",
        js_string(contract),
        js_string(&content.accent_color),
        JS
    );

    SiteBundle {
        html,
        css: CSS.replace("__ACCENT__", &content.accent_color),
        js,
    }
}
