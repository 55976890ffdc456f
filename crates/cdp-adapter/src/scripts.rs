//! JavaScript snippets evaluated in the page. Every caller-provided string is embedded as a JSON
//! literal so selectors and values never need manual escaping.

use crate::page::ScrollTarget;

fn literal(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Resolves to `{ attached, visible }` for the first element matching `selector`.
pub fn element_state(selector: &str) -> String {
    format!(
        "(() => {{\n    let el;\n    try {{ el = document.querySelector({selector}); }} catch (err) {{ return {{ attached: false, visible: false }}; }}\n    if (!el) {{ return {{ attached: false, visible: false }}; }}\n    const style = window.getComputedStyle(el);\n    const rect = el.getBoundingClientRect();\n    const visible = style.visibility !== 'hidden' && style.display !== 'none' && (rect.width > 0 || rect.height > 0 || el.getClientRects().length > 0);\n    return {{ attached: true, visible }};\n}})()",
        selector = literal(selector)
    )
}

pub fn query_text(selector: &str) -> String {
    format!(
        "(() => {{\n    try {{\n        return Array.from(document.querySelectorAll({selector}), (el) => (el.innerText ?? el.textContent ?? '').trim());\n    }} catch (err) {{ return []; }}\n}})()",
        selector = literal(selector)
    )
}

pub fn query_html(selector: &str, outer: bool) -> String {
    let prop = if outer { "outerHTML" } else { "innerHTML" };
    format!(
        "(() => {{\n    try {{\n        return Array.from(document.querySelectorAll({selector}), (el) => el.{prop});\n    }} catch (err) {{ return []; }}\n}})()",
        selector = literal(selector),
        prop = prop
    )
}

pub fn query_attribute(selector: &str, attribute: &str) -> String {
    format!(
        "(() => {{\n    try {{\n        return Array.from(document.querySelectorAll({selector}), (el) => el.getAttribute({attribute}));\n    }} catch (err) {{ return []; }}\n}})()",
        selector = literal(selector),
        attribute = literal(attribute)
    )
}

pub fn scroll(target: &ScrollTarget) -> String {
    match target {
        ScrollTarget::Element(selector) => format!(
            "(() => {{\n    const el = document.querySelector({selector});\n    if (!el) {{ return false; }}\n    el.scrollIntoView({{ block: 'center', inline: 'nearest' }});\n    return true;\n}})()",
            selector = literal(selector)
        ),
        ScrollTarget::By { x, y } => format!("(() => {{ window.scrollBy({x}, {y}); return true; }})()"),
        ScrollTarget::Top => "(() => { window.scrollTo(0, 0); return true; })()".to_string(),
        ScrollTarget::Bottom => {
            "(() => { window.scrollTo(0, document.body ? document.body.scrollHeight : 0); return true; })()"
                .to_string()
        }
    }
}

/// Resolves to the selected values, or `null` when the select is missing.
pub fn select_option(selector: &str, value: &str) -> String {
    format!(
        "(() => {{\n    const el = document.querySelector({selector});\n    if (!el || !el.options) {{ return null; }}\n    const wanted = {value};\n    let matched = false;\n    for (const opt of Array.from(el.options)) {{\n        const hit = opt.value === wanted || (opt.label || opt.text || '').trim() === wanted;\n        opt.selected = hit && (!matched || el.multiple);\n        matched = matched || hit;\n    }}\n    el.dispatchEvent(new Event('input', {{ bubbles: true }}));\n    el.dispatchEvent(new Event('change', {{ bubbles: true }}));\n    return Array.from(el.selectedOptions || [], (opt) => opt.value);\n}})()",
        selector = literal(selector),
        value = literal(value)
    )
}

/// Resolves to `true` when the element exists.
pub fn set_checked(selector: &str, checked: bool) -> String {
    format!(
        "(() => {{\n    const el = document.querySelector({selector});\n    if (!el) {{ return false; }}\n    if (!!el.checked !== {checked}) {{ el.click(); }}\n    if (!!el.checked !== {checked}) {{\n        el.checked = {checked};\n        el.dispatchEvent(new Event('change', {{ bubbles: true }}));\n    }}\n    return true;\n}})()",
        selector = literal(selector),
        checked = checked
    )
}

pub fn clear_input(selector: &str) -> String {
    format!(
        "(() => {{\n    const el = document.querySelector({selector});\n    if (!el) {{ return false; }}\n    if ('value' in el) {{ el.value = ''; }} else if (el.isContentEditable) {{ el.textContent = ''; }}\n    el.dispatchEvent(new Event('input', {{ bubbles: true }}));\n    return true;\n}})()",
        selector = literal(selector)
    )
}

pub fn focus(selector: &str) -> String {
    format!(
        "(() => {{\n    const el = document.querySelector({selector});\n    if (!el) {{ return false; }}\n    el.focus();\n    return true;\n}})()",
        selector = literal(selector)
    )
}

/// Operation performed inside a same-origin iframe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOperation {
    ExtractText,
    ExtractHtml,
    Click,
}

/// Resolves to the text, html or `true` (click) for `inner` inside the iframe matched by
/// `frame`, or `null` when either element is missing or the frame is cross-origin.
pub fn frame_operation(frame: &str, inner: &str, operation: FrameOperation) -> String {
    let body = match operation {
        FrameOperation::ExtractText => "return (el.innerText ?? el.textContent ?? '').trim();",
        FrameOperation::ExtractHtml => "return el.innerHTML;",
        FrameOperation::Click => "el.click(); return true;",
    };
    format!(
        "(() => {{\n    const frame = document.querySelector({frame});\n    let doc;\n    try {{ doc = frame && (frame.contentDocument || (frame.contentWindow && frame.contentWindow.document)); }} catch (err) {{ return null; }}\n    if (!doc) {{ return null; }}\n    const el = doc.querySelector({inner});\n    if (!el) {{ return null; }}\n    {body}\n}})()",
        frame = literal(frame),
        inner = literal(inner),
        body = body
    )
}

/// Registered on new documents when stealth is enabled.
pub const STEALTH_INIT: &str = "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });\nwindow.chrome = window.chrome || { runtime: {} };\nObject.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_are_embedded_as_json_literals() {
        let script = element_state("a[href=\"x\"]");
        assert!(script.contains(r#"document.querySelector("a[href=\"x\"]")"#));
    }

    #[test]
    fn attribute_query_quotes_attribute_name() {
        let script = query_attribute("body a", "href");
        assert!(script.contains(r#"querySelectorAll("body a")"#));
        assert!(script.contains(r#"getAttribute("href")"#));
    }

    #[test]
    fn frame_operation_targets_inner_document() {
        let script = frame_operation("#pay", "button.ok", FrameOperation::Click);
        assert!(script.contains(r##"document.querySelector("#pay")"##));
        assert!(script.contains(r#"doc.querySelector("button.ok")"#));
        assert!(script.contains("el.click()"));
    }

    #[test]
    fn scroll_by_embeds_offsets() {
        let script = scroll(&ScrollTarget::By { x: 0, y: 400 });
        assert!(script.contains("window.scrollBy(0, 400)"));
    }
}
