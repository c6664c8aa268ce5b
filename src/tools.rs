//! The tool catalogue.
//!
//! Each tool is an infallible async function: whatever goes wrong inside the
//! engine comes back as a text [`Envelope`] (`Failed to <verb>: ...`), never
//! as a Rust error. Status strings are part of the tool contract. Tools that
//! change the page run through [`Session::run`] so they settle and append a
//! fresh snapshot; read-only tools return their status alone.

use std::time::Duration;

use corvid_browser::error::Result;
use corvid_browser::page::ElementState;
use corvid_browser::session::{Envelope, RunOptions, Session};

fn failure(action: &str, error: impl std::fmt::Display) -> Envelope {
    Envelope::text(format!("Failed to {action}: {error}"))
}

fn display(error: impl std::fmt::Display) -> String {
    error.to_string()
}

// ---------------------------------------------------------------------------
// Navigation
// ---------------------------------------------------------------------------

pub async fn navigate(session: &mut Session, url: &str) -> Envelope {
    match navigate_inner(session, url).await {
        Ok(envelope) => envelope,
        Err(e) => failure("navigate", e),
    }
}

async fn navigate_inner(session: &mut Session, url: &str) -> Result<Envelope> {
    let url = url.to_string();
    // Navigation waits for the load event itself; no settle pass on top.
    session
        .run(
            RunOptions {
                status: "Successfully navigated to the page".into(),
                capture_snapshot: true,
                wait_for_completion: false,
                preserve_file_chooser: false,
            },
            |page| async move { page.navigate(&url).await },
        )
        .await
}

pub async fn go_back(session: &mut Session) -> Envelope {
    match history_inner(session, "Navigated back", true).await {
        Ok(envelope) => envelope,
        Err(e) => failure("go back", e),
    }
}

pub async fn go_forward(session: &mut Session) -> Envelope {
    match history_inner(session, "Navigated forward", false).await {
        Ok(envelope) => envelope,
        Err(e) => failure("go forward", e),
    }
}

async fn history_inner(session: &mut Session, status: &str, back: bool) -> Result<Envelope> {
    session
        .run_and_wait(status.to_string(), |page| async move {
            if back {
                page.go_back().await
            } else {
                page.go_forward().await
            }
        })
        .await
}

/// Sleep, capped at ten seconds. Needs no page and never fails.
pub async fn wait(time: f64) -> Envelope {
    let seconds = if time.is_finite() {
        time.clamp(0.0, 10.0)
    } else {
        0.0
    };
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    Envelope::text(format!("Waited for {time} seconds"))
}

// ---------------------------------------------------------------------------
// Element actions
// ---------------------------------------------------------------------------

pub async fn press_key(session: &mut Session, key: &str) -> Envelope {
    let status = format!("Pressed key {key}");
    let key = key.to_string();
    let run = session
        .run_and_wait(status, |page| async move { page.press_key(&key).await })
        .await;
    match run {
        Ok(envelope) => envelope,
        Err(e) => failure("press key", e),
    }
}

pub async fn click(session: &mut Session, element: &str, reference: &str) -> Envelope {
    match click_inner(session, element, reference).await {
        Ok(envelope) => envelope,
        Err(e) => failure("click", e),
    }
}

async fn click_inner(session: &mut Session, element: &str, reference: &str) -> Result<Envelope> {
    let target = session.ref_locator(reference)?;
    session
        .run_and_wait(format!("Clicked \"{element}\""), |page| async move {
            page.click_backend_node(target.backend_node_id).await
        })
        .await
}

pub async fn type_text(
    session: &mut Session,
    element: &str,
    reference: &str,
    text: &str,
    submit: bool,
) -> Envelope {
    match type_inner(session, element, reference, text, submit).await {
        Ok(envelope) => envelope,
        Err(e) => failure("type", e),
    }
}

async fn type_inner(
    session: &mut Session,
    element: &str,
    reference: &str,
    text: &str,
    submit: bool,
) -> Result<Envelope> {
    let target = session.ref_locator(reference)?;
    let status = format!("Typed \"{text}\" into \"{element}\"");
    let text = text.to_string();
    session
        .run_and_wait(status, |page| async move {
            page.fill_backend_node(target.backend_node_id, &text).await?;
            if submit {
                page.press_key("Enter").await?;
            }
            Ok(())
        })
        .await
}

pub async fn hover(session: &mut Session, element: &str, reference: &str) -> Envelope {
    match hover_inner(session, element, reference).await {
        Ok(envelope) => envelope,
        Err(e) => failure("hover", e),
    }
}

async fn hover_inner(session: &mut Session, element: &str, reference: &str) -> Result<Envelope> {
    let target = session.ref_locator(reference)?;
    session
        .run_and_wait(format!("Hovered over \"{element}\""), |page| async move {
            page.hover_backend_node(target.backend_node_id).await
        })
        .await
}

pub async fn drag(
    session: &mut Session,
    start_element: &str,
    start_ref: &str,
    end_element: &str,
    end_ref: &str,
) -> Envelope {
    match drag_inner(session, start_element, start_ref, end_element, end_ref).await {
        Ok(envelope) => envelope,
        Err(e) => failure("drag", e),
    }
}

async fn drag_inner(
    session: &mut Session,
    start_element: &str,
    start_ref: &str,
    end_element: &str,
    end_ref: &str,
) -> Result<Envelope> {
    let start = session.ref_locator(start_ref)?;
    let end = session.ref_locator(end_ref)?;
    session
        .run_and_wait(
            format!("Dragged \"{start_element}\" to \"{end_element}\""),
            |page| async move {
                page.drag_backend_node(start.backend_node_id, end.backend_node_id)
                    .await
            },
        )
        .await
}

pub async fn select_option(
    session: &mut Session,
    element: &str,
    reference: &str,
    values: &[String],
) -> Envelope {
    match select_inner(session, element, reference, values).await {
        Ok(envelope) => envelope,
        Err(e) => failure("select options", e),
    }
}

async fn select_inner(
    session: &mut Session,
    element: &str,
    reference: &str,
    values: &[String],
) -> Result<Envelope> {
    let target = session.ref_locator(reference)?;
    let values = values.to_vec();
    session
        .run_and_wait(
            format!("Selected options in \"{element}\""),
            |page| async move {
                page.select_options_backend_node(target.backend_node_id, &values)
                    .await
            },
        )
        .await
}

pub async fn choose_file(session: &mut Session, paths: &[String]) -> Envelope {
    let status = format!("Chose files {}", paths.join(", "));
    match session.submit_files_and_snapshot(paths, &status).await {
        Ok(envelope) => envelope,
        Err(e) => failure("choose files", e),
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

pub async fn aria_snapshot(session: &mut Session) -> Envelope {
    match session.capture_snapshot("").await {
        Ok(envelope) => envelope,
        Err(e) => failure("capture snapshot", e),
    }
}

pub async fn screenshot(session: &mut Session, raw: bool) -> Envelope {
    match screenshot_inner(session, raw).await {
        Ok(envelope) => envelope,
        Err(e) => failure("take screenshot", e),
    }
}

async fn screenshot_inner(session: &mut Session, raw: bool) -> Result<Envelope> {
    let page = session.existing_page()?;
    let bytes = page.screenshot(raw).await?;
    Ok(Envelope::image(&bytes, raw))
}

pub async fn save_pdf(session: &mut Session) -> Envelope {
    match save_pdf_inner(session).await {
        Ok(envelope) => envelope,
        Err(e) => failure("save PDF", e),
    }
}

async fn save_pdf_inner(session: &mut Session) -> Result<Envelope> {
    let page = session.existing_page()?;
    let bytes = page.print_to_pdf().await?;
    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
    let path = std::env::temp_dir().join(format!("page-{stamp}.pdf"));
    tokio::fs::write(&path, bytes).await?;
    Ok(Envelope::text(format!("Saved as {}", path.display())))
}

pub async fn get_text(session: &mut Session, target: &str) -> Envelope {
    match get_text_inner(session, target).await {
        Ok(envelope) => envelope,
        Err(e) => failure("get text", e),
    }
}

async fn get_text_inner(session: &mut Session, target: &str) -> Result<Envelope> {
    let page = session.existing_page()?;
    let found = page.find_text(target).await?;
    Ok(Envelope::text(match found {
        Some(text) => text,
        None => format!("No element found containing text \"{target}\""),
    }))
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------
//
// Assertions do not get the failure prefix: a failed expectation comes back
// as the bare message so callers can show it verbatim.

pub async fn assert_element(
    session: &mut Session,
    element: &str,
    reference: &str,
    assertion: &str,
    expected: Option<&str>,
) -> Envelope {
    let text = match assert_element_eval(session, element, reference, assertion, expected).await {
        Ok(status) => status,
        Err(message) => message,
    };
    Envelope::text(text)
}

async fn assert_element_eval(
    session: &mut Session,
    element: &str,
    reference: &str,
    assertion: &str,
    expected: Option<&str>,
) -> std::result::Result<String, String> {
    let check = parse_element_assertion(assertion, expected)?;
    let target = session.ref_locator(reference).map_err(display)?;
    let page = session.existing_page().map_err(display)?;
    let state = page
        .element_state(target.backend_node_id)
        .await
        .map_err(display)?;
    run_element_check(element, &check, &state)?;
    Ok(assert_status(element, assertion, expected))
}

pub async fn assert_page(
    session: &mut Session,
    assertion: &str,
    expected: Option<&str>,
) -> Envelope {
    let text = match assert_page_eval(session, assertion, expected).await {
        Ok(status) => status,
        Err(message) => message,
    };
    Envelope::text(text)
}

async fn assert_page_eval(
    session: &mut Session,
    assertion: &str,
    expected: Option<&str>,
) -> std::result::Result<String, String> {
    let check = parse_page_assertion(assertion, expected)?;
    let page = session.existing_page().map_err(display)?;
    let actual = match &check {
        PageCheck::Title(_) => page.title().await,
        PageCheck::Url(_) => page.url().await,
    }
    .map_err(display)?;
    run_page_check(&check, &actual)?;
    let mut status = format!("Asserted page {assertion}");
    if let Some(expected) = expected {
        status.push_str(&format!(" equals \"{expected}\""));
    }
    Ok(status)
}

#[derive(Debug)]
enum ElementCheck {
    Visible,
    Text(String),
    Enabled,
    Checked,
}

fn parse_element_assertion(
    assertion: &str,
    expected: Option<&str>,
) -> std::result::Result<ElementCheck, String> {
    match assertion.to_lowercase().as_str() {
        "isvisible" => Ok(ElementCheck::Visible),
        "hastext" => match expected {
            Some(expected) => Ok(ElementCheck::Text(expected.to_string())),
            None => Err(format!("Expected value required for {assertion} assertion")),
        },
        "isenabled" => Ok(ElementCheck::Enabled),
        "ischecked" => Ok(ElementCheck::Checked),
        _ => Err(format!("Unsupported assertion type: {assertion}")),
    }
}

fn run_element_check(
    element: &str,
    check: &ElementCheck,
    state: &ElementState,
) -> std::result::Result<(), String> {
    match check {
        ElementCheck::Visible if state.visible => Ok(()),
        ElementCheck::Visible => Err(format!("Element \"{element}\" is not visible")),
        ElementCheck::Text(expected) if state.text == *expected => Ok(()),
        ElementCheck::Text(expected) => Err(format!(
            "Element \"{element}\" has text \"{}\", expected \"{expected}\"",
            state.text
        )),
        ElementCheck::Enabled if state.enabled => Ok(()),
        ElementCheck::Enabled => Err(format!("Element \"{element}\" is not enabled")),
        ElementCheck::Checked if state.checked => Ok(()),
        ElementCheck::Checked => Err(format!("Element \"{element}\" is not checked")),
    }
}

fn assert_status(element: &str, assertion: &str, expected: Option<&str>) -> String {
    let mut status = format!("Asserted \"{element}\" {assertion}");
    if let Some(expected) = expected {
        status.push_str(&format!(" equals \"{expected}\""));
    }
    status
}

#[derive(Debug)]
enum PageCheck {
    Title(String),
    Url(String),
}

fn parse_page_assertion(
    assertion: &str,
    expected: Option<&str>,
) -> std::result::Result<PageCheck, String> {
    let kind = assertion.to_lowercase();
    match kind.as_str() {
        "hastitle" | "hasurl" => {}
        "isok" => return Err("Response assertions not yet implemented".to_string()),
        _ => return Err(format!("Unsupported page assertion type: {assertion}")),
    }
    let Some(expected) = expected else {
        return Err(format!("Expected value required for {assertion} assertion"));
    };
    Ok(if kind == "hastitle" {
        PageCheck::Title(expected.to_string())
    } else {
        PageCheck::Url(expected.to_string())
    })
}

fn run_page_check(check: &PageCheck, actual: &str) -> std::result::Result<(), String> {
    match check {
        PageCheck::Title(expected) if actual == expected => Ok(()),
        PageCheck::Url(expected) if actual == expected => Ok(()),
        PageCheck::Title(expected) => {
            Err(format!("Page title is \"{actual}\", expected \"{expected}\""))
        }
        PageCheck::Url(expected) => {
            Err(format!("Page URL is \"{actual}\", expected \"{expected}\""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(visible: bool, text: &str, enabled: bool, checked: bool) -> ElementState {
        ElementState {
            visible,
            text: text.to_string(),
            enabled,
            checked,
        }
    }

    #[test]
    fn failure_messages_carry_the_verb() {
        let Envelope::Text(text) = failure("click", "boom") else {
            panic!("expected text");
        };
        assert_eq!(text, "Failed to click: boom");
    }

    #[tokio::test]
    async fn wait_reports_the_requested_time() {
        assert_eq!(wait(0.0).await, Envelope::text("Waited for 0 seconds"));
        assert_eq!(wait(0.25).await, Envelope::text("Waited for 0.25 seconds"));
    }

    #[test]
    fn assertion_dispatch_is_case_insensitive() {
        assert!(matches!(
            parse_element_assertion("ISVISIBLE", None),
            Ok(ElementCheck::Visible)
        ));
        assert!(matches!(
            parse_element_assertion("hasText", Some("hi")),
            Ok(ElementCheck::Text(_))
        ));
    }

    #[test]
    fn unknown_assertion_is_rejected_with_its_original_name() {
        assert_eq!(
            parse_element_assertion("hasAttribute", None).unwrap_err(),
            "Unsupported assertion type: hasAttribute"
        );
    }

    #[test]
    fn has_text_requires_an_expected_value() {
        assert_eq!(
            parse_element_assertion("hasText", None).unwrap_err(),
            "Expected value required for hasText assertion"
        );
    }

    #[test]
    fn visibility_check_names_the_element() {
        let check = ElementCheck::Visible;
        assert!(run_element_check("Save", &check, &state(true, "", true, false)).is_ok());
        assert_eq!(
            run_element_check("Save", &check, &state(false, "", true, false)).unwrap_err(),
            "Element \"Save\" is not visible"
        );
    }

    #[test]
    fn text_check_is_exact() {
        let check = ElementCheck::Text("Hello".to_string());
        assert!(run_element_check("Greeting", &check, &state(true, "Hello", true, false)).is_ok());
        assert_eq!(
            run_element_check("Greeting", &check, &state(true, "Hello!", true, false))
                .unwrap_err(),
            "Element \"Greeting\" has text \"Hello!\", expected \"Hello\""
        );
    }

    #[test]
    fn enabled_and_checked_checks_report_plainly() {
        assert_eq!(
            run_element_check("Go", &ElementCheck::Enabled, &state(true, "", false, false))
                .unwrap_err(),
            "Element \"Go\" is not enabled"
        );
        assert_eq!(
            run_element_check("Opt", &ElementCheck::Checked, &state(true, "", true, false))
                .unwrap_err(),
            "Element \"Opt\" is not checked"
        );
    }

    #[test]
    fn assert_status_appends_expected_when_present() {
        assert_eq!(assert_status("Save", "isVisible", None), "Asserted \"Save\" isVisible");
        assert_eq!(
            assert_status("Title", "hasText", Some("Hi")),
            "Asserted \"Title\" hasText equals \"Hi\""
        );
    }

    #[test]
    fn page_assertions_parse_title_and_url() {
        assert!(matches!(
            parse_page_assertion("hasTitle", Some("T")),
            Ok(PageCheck::Title(_))
        ));
        assert!(matches!(
            parse_page_assertion("hasURL", Some("u")),
            Ok(PageCheck::Url(_))
        ));
        assert_eq!(
            parse_page_assertion("hasTitle", None).unwrap_err(),
            "Expected value required for hasTitle assertion"
        );
    }

    #[test]
    fn response_assertions_are_not_implemented() {
        assert_eq!(
            parse_page_assertion("isOk", Some("200")).unwrap_err(),
            "Response assertions not yet implemented"
        );
    }

    #[test]
    fn unknown_page_assertion_is_rejected() {
        assert_eq!(
            parse_page_assertion("hasCookie", None).unwrap_err(),
            "Unsupported page assertion type: hasCookie"
        );
    }

    #[test]
    fn page_checks_compare_exactly() {
        let check = PageCheck::Title("Docs".to_string());
        assert!(run_page_check(&check, "Docs").is_ok());
        assert_eq!(
            run_page_check(&check, "Home").unwrap_err(),
            "Page title is \"Home\", expected \"Docs\""
        );
        let check = PageCheck::Url("https://a/".to_string());
        assert_eq!(
            run_page_check(&check, "https://b/").unwrap_err(),
            "Page URL is \"https://b/\", expected \"https://a/\""
        );
    }
}
