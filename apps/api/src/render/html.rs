use quick_xml::escape::escape;

use crate::payments::pipeline::ResultsView;
use crate::render::document::{build_sections, Block, Section};

const STYLE: &str = "\
body{font-family:system-ui,sans-serif;max-width:820px;margin:2rem auto;padding:0 1rem;color:#1d1d1f}\
nav.tabs a{display:inline-block;padding:.4rem .8rem;margin-right:.3rem;border:1px solid #ccc;border-radius:6px;text-decoration:none}\
section{border-top:1px solid #eee;padding-top:1rem;margin-top:1.5rem}\
.score{font-weight:600}.failed{color:#b3261e}.pending{color:#6b6b6b}";

fn push_block(html: &mut String, block: &Block) {
    match block {
        Block::Heading(text) => html.push_str(&format!("<h3>{}</h3>\n", escape(text.as_str()))),
        Block::Paragraph(text) => html.push_str(&format!("<p>{}</p>\n", escape(text.as_str()))),
        Block::Bullet(text) => html.push_str(&format!("<li>{}</li>\n", escape(text.as_str()))),
        Block::Score { label, value } => html.push_str(&format!(
            "<p class=\"score\">{}: {value}/100</p>\n",
            escape(label.as_str())
        )),
        Block::Failed(text) => html.push_str(&format!("<p class=\"failed\">{}</p>\n", escape(text.as_str()))),
        Block::Pending(text) => html.push_str(&format!("<p class=\"pending\">{}</p>\n", escape(text.as_str()))),
    }
}

fn push_section(html: &mut String, section: &Section) {
    html.push_str(&format!(
        "<section id=\"{}\">\n<h2>{}</h2>\n",
        section.anchor(),
        escape(section.title.as_str())
    ));
    let mut in_list = false;
    for block in &section.blocks {
        let is_bullet = matches!(block, Block::Bullet(_));
        if is_bullet != in_list {
            html.push_str(if is_bullet { "<ul>\n" } else { "</ul>\n" });
            in_list = is_bullet;
        }
        push_block(html, block);
    }
    if in_list {
        html.push_str("</ul>\n");
    }
    html.push_str("</section>\n");
}

/// Renders the visible results as a standalone HTML page.
///
/// Pure function of the stored outcomes; all model text is escaped. With more
/// than one premium product a tab bar links to each section.
pub fn render_results_html(view: &ResultsView) -> String {
    let sections = build_sections(view);
    let any_failed = sections
        .iter()
        .any(|s| s.product.is_some() && s.blocks.iter().any(|b| matches!(b, Block::Failed(_))));

    let mut html = String::from("<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!(
        "<title>Resume review: {}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n",
        escape(view.file_name.as_str())
    ));
    html.push_str(&format!(
        "<h1>Resume review</h1>\n<p>{} &middot; payment {} &middot; generation {}</p>\n",
        escape(view.file_name.as_str()),
        view.payment_status.as_str(),
        view.generation_status.as_str()
    ));

    let premium: Vec<&Section> = sections.iter().filter(|s| s.product.is_some()).collect();
    if premium.len() > 1 {
        html.push_str("<nav class=\"tabs\">\n");
        for section in &premium {
            html.push_str(&format!(
                "<a href=\"#{}\">{}</a>\n",
                section.anchor(),
                escape(section.title.as_str())
            ));
        }
        html.push_str("</nav>\n");
    }

    for section in &sections {
        push_section(&mut html, section);
    }

    if any_failed {
        html.push_str(&format!(
            "<form method=\"post\" action=\"/results/{}/retry\"><button type=\"submit\">Retry failed items</button></form>\n",
            view.analysis_id
        ));
    }
    html.push_str("</body>\n</html>\n");
    html
}
