use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use corvid_tools::{tools, Envelope, LaunchOptions, Session};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct NavigateRequest {
    #[schemars(description = "URL to navigate to")]
    pub url: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct WaitRequest {
    #[schemars(description = "Seconds to wait (capped at 10)")]
    pub time: f64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PressKeyRequest {
    #[schemars(description = "Key to press (e.g. Enter, Tab, Escape, ArrowDown, Backspace)")]
    pub key: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ClickRequest {
    #[schemars(description = "Human-readable element description")]
    pub element: String,
    #[serde(rename = "ref")]
    #[schemars(description = "Element ref from the most recent snapshot")]
    pub reference: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TypeRequest {
    #[schemars(description = "Human-readable element description")]
    pub element: String,
    #[serde(rename = "ref")]
    #[schemars(description = "Element ref from the most recent snapshot")]
    pub reference: String,
    #[schemars(description = "Text to type into the element")]
    pub text: String,
    #[serde(default)]
    #[schemars(description = "Press Enter after typing")]
    pub submit: bool,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct HoverRequest {
    #[schemars(description = "Human-readable element description")]
    pub element: String,
    #[serde(rename = "ref")]
    #[schemars(description = "Element ref from the most recent snapshot")]
    pub reference: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DragRequest {
    #[serde(rename = "startElement")]
    #[schemars(description = "Description of the element to drag")]
    pub start_element: String,
    #[serde(rename = "startRef")]
    #[schemars(description = "Ref of the element to drag")]
    pub start_ref: String,
    #[serde(rename = "endElement")]
    #[schemars(description = "Description of the drop target")]
    pub end_element: String,
    #[serde(rename = "endRef")]
    #[schemars(description = "Ref of the drop target")]
    pub end_ref: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SelectOptionRequest {
    #[schemars(description = "Human-readable element description")]
    pub element: String,
    #[serde(rename = "ref")]
    #[schemars(description = "Element ref from the most recent snapshot")]
    pub reference: String,
    #[schemars(description = "Option values or labels to select")]
    pub values: Vec<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ChooseFileRequest {
    #[schemars(description = "Absolute paths of the files to attach")]
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ScreenshotRequest {
    #[serde(default)]
    #[schemars(description = "Return a lossless PNG instead of compressed JPEG")]
    pub raw: bool,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetTextRequest {
    #[schemars(description = "Text to locate on the page")]
    pub target: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AssertRequest {
    #[schemars(description = "Human-readable element description")]
    pub element: String,
    #[serde(rename = "ref")]
    #[schemars(description = "Element ref from the most recent snapshot")]
    pub reference: String,
    #[schemars(description = "Assertion type: isVisible, hasText, isEnabled, isChecked")]
    pub assertion: String,
    #[schemars(description = "Expected value, required for hasText")]
    pub expected: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PageAssertRequest {
    #[schemars(description = "Assertion type: hasTitle, hasURL")]
    pub assertion: String,
    #[schemars(description = "Expected value")]
    pub expected: Option<String>,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn err(e: impl std::fmt::Display) -> ErrorData {
    ErrorData::internal_error(e.to_string(), None::<Value>)
}

fn no_page() -> ErrorData {
    ErrorData::internal_error("No page open. Use navigate first.", None::<Value>)
}

fn deliver(envelope: Envelope) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![match envelope {
        Envelope::Text(text) => Content::text(text),
        Envelope::Image { data, mime } => Content::image(data, mime),
    }]))
}

#[derive(Clone)]
pub struct CorvidServer {
    session: Arc<Mutex<Option<Session>>>,
    launch: LaunchOptions,
    tool_router: ToolRouter<Self>,
}

impl CorvidServer {
    async fn ensure_session(&self) -> Result<(), ErrorData> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            let mut session = Session::new();
            session.create_page(&self.launch).await.map_err(err)?;
            *guard = Some(session);
        }
        Ok(())
    }
}

#[tool_router]
impl CorvidServer {
    pub fn new(launch: LaunchOptions) -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
            launch,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Navigate to a URL. Launches the browser on first call and returns a page snapshot with element refs."
    )]
    async fn navigate(
        &self,
        req: Parameters<NavigateRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        self.ensure_session().await?;
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::navigate(session, &req.0.url).await)
    }

    #[tool(description = "Go back in browser history and snapshot the page.")]
    async fn go_back(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::go_back(session).await)
    }

    #[tool(description = "Go forward in browser history and snapshot the page.")]
    async fn go_forward(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::go_forward(session).await)
    }

    #[tool(description = "Wait for a number of seconds (capped at 10).")]
    async fn wait(&self, req: Parameters<WaitRequest>) -> Result<CallToolResult, ErrorData> {
        deliver(tools::wait(req.0.time).await)
    }

    #[tool(description = "Press a keyboard key (e.g. Enter, Tab, Escape, ArrowDown, Backspace).")]
    async fn press_key(
        &self,
        req: Parameters<PressKeyRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::press_key(session, &req.0.key).await)
    }

    #[tool(
        description = "Click an element by its snapshot ref, wait for the page to settle, and return a fresh snapshot."
    )]
    async fn click(&self, req: Parameters<ClickRequest>) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::click(session, &req.0.element, &req.0.reference).await)
    }

    #[tool(
        name = "type",
        description = "Type text into an editable element by its snapshot ref, optionally pressing Enter afterwards."
    )]
    async fn type_text(&self, req: Parameters<TypeRequest>) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(
            tools::type_text(
                session,
                &req.0.element,
                &req.0.reference,
                &req.0.text,
                req.0.submit,
            )
            .await,
        )
    }

    #[tool(description = "Hover the pointer over an element by its snapshot ref.")]
    async fn hover(&self, req: Parameters<HoverRequest>) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::hover(session, &req.0.element, &req.0.reference).await)
    }

    #[tool(description = "Drag one element onto another, both addressed by snapshot ref.")]
    async fn drag(&self, req: Parameters<DragRequest>) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(
            tools::drag(
                session,
                &req.0.start_element,
                &req.0.start_ref,
                &req.0.end_element,
                &req.0.end_ref,
            )
            .await,
        )
    }

    #[tool(description = "Select one or more options in a dropdown by its snapshot ref.")]
    async fn select_option(
        &self,
        req: Parameters<SelectOptionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::select_option(session, &req.0.element, &req.0.reference, &req.0.values).await)
    }

    #[tool(
        description = "Attach files to the file chooser a previous action opened. Fails if no chooser is pending."
    )]
    async fn choose_file(
        &self,
        req: Parameters<ChooseFileRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::choose_file(session, &req.0.paths).await)
    }

    #[tool(
        description = "Capture an accessibility snapshot of the page. Element refs in it address later actions."
    )]
    async fn aria_snapshot(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::aria_snapshot(session).await)
    }

    #[tool(description = "Take a screenshot of the viewport. JPEG by default, PNG when raw.")]
    async fn screenshot(
        &self,
        req: Parameters<ScreenshotRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::screenshot(session, req.0.raw).await)
    }

    #[tool(description = "Save the page as a PDF in the temp directory.")]
    async fn save_pdf(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::save_pdf(session).await)
    }

    #[tool(
        description = "Find text on the page: headings first, then exact matches, substrings, and test ids."
    )]
    async fn get_text(&self, req: Parameters<GetTextRequest>) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::get_text(session, &req.0.target).await)
    }

    #[tool(
        name = "assert",
        description = "Assert an element's state by ref: isVisible, hasText, isEnabled, or isChecked."
    )]
    async fn assert_element(
        &self,
        req: Parameters<AssertRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(
            tools::assert_element(
                session,
                &req.0.element,
                &req.0.reference,
                &req.0.assertion,
                req.0.expected.as_deref(),
            )
            .await,
        )
    }

    #[tool(description = "Assert a page-level property: hasTitle or hasURL.")]
    async fn page_assert(
        &self,
        req: Parameters<PageAssertRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(no_page)?;
        deliver(tools::assert_page(session, &req.0.assertion, req.0.expected.as_deref()).await)
    }
}

#[tool_handler]
impl ServerHandler for CorvidServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "corvid-tools".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Browser automation server. Use 'navigate' to open a URL (launches the browser \
                 automatically); every page-changing tool returns a snapshot whose [ref=...] \
                 tokens address elements for click/type/hover/drag/select_option. Refs are only \
                 valid against the newest snapshot; take a new one after the page changes. \
                 'choose_file' answers a pending file chooser, 'assert' and 'page_assert' check \
                 state, 'screenshot' and 'save_pdf' capture the page."
                    .into(),
            ),
        }
    }
}

pub async fn run_server(launch: LaunchOptions) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let server = CorvidServer::new(launch);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
