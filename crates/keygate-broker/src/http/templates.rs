//! Server-rendered HTML pages for the login flow.
//!
//! Only three pages exist: connector selection, the password form and the
//! error page. Every interpolated value goes through [`html_escape`].

const STYLES: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    background: #f4f5f9;
    min-height: 100vh;
    display: flex;
    justify-content: center;
    align-items: center;
    color: #1c1f40;
    line-height: 1.5;
}
.container { width: 100%; max-width: 400px; padding: 1rem; }
.card {
    background: #fff;
    border: 1px solid #e2e4ee;
    border-radius: 12px;
    padding: 2rem;
}
.card-title { font-size: 1.25rem; font-weight: 600; margin-bottom: 1.5rem; text-align: center; }
.connector {
    display: block;
    padding: 0.75rem 1rem;
    margin-bottom: 0.5rem;
    border: 1px solid #e2e4ee;
    border-radius: 8px;
    color: #1c1f40;
    text-decoration: none;
    text-align: center;
}
.connector:hover { border-color: #3b3fe3; }
.form-group { margin-bottom: 1rem; }
.form-label { display: block; font-size: 0.875rem; margin-bottom: 0.25rem; }
.form-input { width: 100%; padding: 0.6rem 0.75rem; border: 1px solid #d0d3e0; border-radius: 6px; }
.btn { width: 100%; padding: 0.7rem; border: 0; border-radius: 6px; background: #3b3fe3; color: #fff; }
.alert-error { background: #fdecea; color: #a3261b; border-radius: 6px; padding: 0.6rem 0.75rem; margin-bottom: 1rem; }
.error-description { margin-bottom: 0.75rem; }
.error-code { font-family: monospace; font-size: 0.8rem; color: #6c757d; }
"#;

/// Base HTML template wrapper.
fn html_page(title: &str, content: &str) -> String {
    let mut html = String::with_capacity(content.len() + STYLES.len() + 400);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"UTF-8\">\n");
    html.push_str(
        "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    html.push_str("    <title>");
    html.push_str(&html_escape(title));
    html.push_str(" - Keygate</title>\n");
    html.push_str("    <style>");
    html.push_str(STYLES);
    html.push_str("</style>\n</head>\n<body>\n    <div class=\"container\">\n");
    html.push_str(content);
    html.push_str("\n    </div>\n</body>\n</html>");
    html
}

/// A connector entry on the selection page.
#[derive(Debug, Clone)]
pub struct ConnectorLink {
    /// Display name.
    pub name: String,
    /// Where the button points.
    pub href: String,
}

/// Renders the connector selection page.
pub fn render_connector_selection(links: &[ConnectorLink]) -> String {
    let mut content = String::with_capacity(1024);
    content.push_str("<div class=\"card\">\n");
    content.push_str("<div class=\"card-title\">Log in to Keygate</div>\n");
    for link in links {
        content.push_str("<a class=\"connector\" href=\"");
        content.push_str(&html_escape(&link.href));
        content.push_str("\">Log in with ");
        content.push_str(&html_escape(&link.name));
        content.push_str("</a>\n");
    }
    content.push_str("</div>");
    html_page("Log In", &content)
}

/// Renders the password form.
///
/// # Arguments
///
/// * `prompt` - Label of the username field, e.g. "Email Address"
/// * `action` - URL the form posts to
/// * `username` - Value to pre-fill after a failed attempt
/// * `error` - Optional error message to display
pub fn render_password_form(
    prompt: &str,
    action: &str,
    username: &str,
    error: Option<&str>,
) -> String {
    let mut content = String::with_capacity(2048);
    content.push_str("<div class=\"card\">\n");
    content.push_str("<div class=\"card-title\">Log in to Your Account</div>\n");

    if let Some(e) = error {
        content.push_str("<div class=\"alert-error\">");
        content.push_str(&html_escape(e));
        content.push_str("</div>\n");
    }

    content.push_str("<form method=\"POST\" action=\"");
    content.push_str(&html_escape(action));
    content.push_str("\">\n");

    content.push_str("<div class=\"form-group\">\n<label class=\"form-label\" for=\"login\">");
    content.push_str(&html_escape(prompt));
    content.push_str("</label>\n");
    content.push_str("<input type=\"text\" id=\"login\" name=\"login\" class=\"form-input\" value=\"");
    content.push_str(&html_escape(username));
    content.push_str("\" required autofocus autocomplete=\"username\">\n</div>\n");

    content.push_str("<div class=\"form-group\">\n");
    content.push_str("<label class=\"form-label\" for=\"password\">Password</label>\n");
    content.push_str(
        "<input type=\"password\" id=\"password\" name=\"password\" class=\"form-input\" ",
    );
    content.push_str("required autocomplete=\"current-password\">\n</div>\n");

    content.push_str("<button type=\"submit\" class=\"btn\">Login</button>\n");
    content.push_str("</form>\n</div>");

    html_page("Log In", &content)
}

/// Renders the error page.
///
/// # Arguments
///
/// * `error_code` - OAuth error code (e.g., "invalid_request")
/// * `error_description` - Human-readable error description
pub fn render_error_page(error_code: &str, error_description: &str) -> String {
    let mut content = String::with_capacity(512);
    content.push_str("<div class=\"card\" style=\"text-align: center;\">\n");
    content.push_str("<div class=\"card-title\">Login Error</div>\n");
    content.push_str("<div class=\"error-description\">");
    content.push_str(&html_escape(error_description));
    content.push_str("</div>\n");
    content.push_str("<div class=\"error-code\">");
    content.push_str(&html_escape(error_code));
    content.push_str("</div>\n</div>");
    html_page("Error", &content)
}

/// Simple HTML escaping to prevent XSS.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
