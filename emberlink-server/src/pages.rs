use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use emberlink_types::{FlowPromptDescriptor, ProviderType};

use crate::crypto;

/// A rendered HTML page plus the nonce its inline assets are tagged with.
/// The CSP header only admits scripts and styles carrying that nonce.
pub struct Page {
    pub html: String,
    pub nonce: String,
    pub status: StatusCode,
}

impl IntoResponse for Page {
    fn into_response(self) -> Response {
        let csp = format!(
            "default-src 'none'; style-src 'nonce-{n}'; \
             script-src 'nonce-{n}'; connect-src 'self'; form-action 'self'; \
             base-uri 'none'; frame-ancestors 'none'",
            n = self.nonce
        );
        let mut response =
            (self.status, Html(self.html)).into_response();
        if let Ok(value) = HeaderValue::from_str(&csp) {
            response
                .headers_mut()
                .insert(header::CONTENT_SECURITY_POLICY, value);
        }
        response
    }
}

fn layout(nonce: &str, title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style nonce="{nonce}">
  body {{ font-family: system-ui, sans-serif; margin: 0; display: flex;
         justify-content: center; align-items: center; min-height: 100vh;
         background: #f5f5f4; color: #1c1917; }}
  .card {{ background: #fff; border-radius: 12px; padding: 2rem;
           max-width: 24rem; width: 100%; box-shadow: 0 1px 4px #0002; }}
  h1 {{ font-size: 1.2rem; margin-top: 0; }}
  input, button {{ width: 100%; box-sizing: border-box; padding: .6rem;
                   margin-top: .5rem; border-radius: 8px;
                   border: 1px solid #d6d3d1; font-size: 1rem; }}
  button {{ background: #1c1917; color: #fff; cursor: pointer; border: 0; }}
  button.alt {{ background: #fff; color: #1c1917;
                border: 1px solid #d6d3d1; }}
  .error {{ color: #b91c1c; margin: .5rem 0; }}
  .muted {{ color: #78716c; font-size: .9rem; }}
</style>
</head>
<body>
<div class="card">
{body}
</div>
</body>
</html>"#
    )
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// The `/authorize` login page: email form plus the SSE listener that waits
/// for `consentRequired` / `loginComplete` on this (the original) device.
pub fn login(
    base_path: &str,
    rid: &str,
    client_name: &str,
    scope: &str,
    providers: &[ProviderType],
) -> Page {
    let nonce = crypto::mint_token(16);
    let client_name = html_escape(client_name);
    let scope_attr = html_escape(scope);

    let provider_buttons: String = providers
        .iter()
        .map(|p| {
            format!(
                r#"<a href="{base_path}/sso/{p}/start?rid={rid}"><button type="button" class="alt">Continue with {p}</button></a>"#,
            )
        })
        .collect();

    let body = format!(
        r#"<h1>Sign in to {client_name}</h1>
<div id="error" class="error"></div>
<div id="login">
  <form id="magic-form">
    <input type="email" id="email" name="email" placeholder="you@example.com" required>
    <button type="submit">Email me a sign-in link</button>
  </form>
  {provider_buttons}
</div>
<div id="sent" hidden>
  <p>Check your email and open the link on any device.</p>
  <p class="muted">This page will continue automatically.</p>
</div>
<div id="consent" hidden>
  <p><b>{client_name}</b> is asking for: <span class="muted">{scope_attr}</span></p>
  <button id="allow">Allow</button>
  <button id="deny" class="alt">Deny</button>
</div>
<noscript><p class="error">JavaScript is required to finish signing in on this device.</p></noscript>
<script nonce="{nonce}">
const rid = "{rid}";
const base = "{base_path}";
const show = (id) => {{
  for (const section of ["login", "sent", "consent"]) {{
    document.getElementById(section).hidden = section !== id;
  }}
}};
const fail = (message) => {{
  document.getElementById("error").textContent = message;
}};

const events = new EventSource(base + "/oauth/sse?rid=" + rid);
events.addEventListener("consentRequired", () => show("consent"));
events.addEventListener("loginComplete", (e) => {{
  const data = JSON.parse(e.data);
  events.close();
  window.location = data.redirect;
}});

document.getElementById("magic-form").addEventListener("submit", async (e) => {{
  e.preventDefault();
  const body = new URLSearchParams();
  body.set("email", document.getElementById("email").value);
  body.set("rid", rid);
  const res = await fetch(base + "/oauth/magic/request", {{
    method: "POST", body
  }});
  if (res.ok) {{ show("sent"); }} else {{
    const err = await res.json().catch(() => ({{}}));
    fail(err.error_description || "Something went wrong.");
  }}
}});

const decide = async (deny) => {{
  const body = new URLSearchParams();
  body.set("rid", rid);
  if (deny) body.set("deny", "1");
  const res = await fetch(base + "/oauth/consent", {{ method: "POST", body }});
  if (res.ok) {{
    const data = await res.json();
    events.close();
    window.location = data.redirect;
  }} else {{
    fail("Could not record your decision.");
  }}
}};
document.getElementById("allow").addEventListener("click", () => decide(false));
document.getElementById("deny").addEventListener("click", () => decide(true));
</script>"#,
    );

    Page {
        html: layout(&nonce, "Sign in", &body),
        nonce,
        status: StatusCode::OK,
    }
}

/// Shown on the authenticating device once it has done its part and the
/// ceremony finished (or continues elsewhere).
pub fn completion(message: &str) -> Page {
    let nonce = crypto::mint_token(16);
    let body = format!(
        "<h1>You're signed in</h1><p>{}</p>\
         <p class=\"muted\">You can close this window.</p>",
        html_escape(message)
    );
    Page {
        html: layout(&nonce, "Signed in", &body),
        nonce,
        status: StatusCode::OK,
    }
}

pub fn continue_elsewhere() -> Page {
    let nonce = crypto::mint_token(16);
    let body = "<h1>Almost there</h1>\
         <p>Return to your original device to approve the sign-in.</p>\
         <p class=\"muted\">You can close this window.</p>";
    Page {
        html: layout(&nonce, "Continue elsewhere", body),
        nonce,
        status: StatusCode::OK,
    }
}

pub fn error(status: StatusCode, message: &str) -> Page {
    let nonce = crypto::mint_token(16);
    let body = format!(
        "<h1>Sign-in failed</h1><p class=\"error\">{}</p>\
         <p class=\"muted\">Start again from the application you came from.</p>",
        html_escape(message)
    );
    Page { html: layout(&nonce, "Sign-in failed", &body), nonce, status }
}

/// A flow prompt (form, captcha or MFA challenge) rendered for the
/// authenticating device. Submits the resume token back to the consume
/// endpoint.
pub fn flow_prompt(action_path: &str, descriptor: &FlowPromptDescriptor) -> Page {
    let nonce = crypto::mint_token(16);
    let title = html_escape(&descriptor.title);
    let description = descriptor
        .description
        .as_deref()
        .map(|d| format!("<p class=\"muted\">{}</p>", html_escape(d)))
        .unwrap_or_default();
    let error = descriptor
        .meta
        .get("error")
        .and_then(|v| v.as_str())
        .map(|e| format!("<p class=\"error\">{}</p>", html_escape(e)))
        .unwrap_or_default();

    let inputs: String = descriptor
        .fields
        .iter()
        .map(|field| {
            let name = html_escape(&field.name);
            let label = html_escape(&field.label);
            let kind = match field.kind.as_str() {
                "password" => "password",
                "email" => "email",
                _ => "text",
            };
            let required = if field.required { " required" } else { "" };
            format!(
                r#"<label>{label}<input type="{kind}" name="{name}"{required}></label>"#
            )
        })
        .collect();

    let body = format!(
        r#"<h1>{title}</h1>
{description}
{error}
<form method="post" action="{action_path}">
  <input type="hidden" name="resume_token" value="{token}">
  {inputs}
  <button type="submit" name="action" value="continue">Continue</button>
</form>"#,
        token = html_escape(&descriptor.resume_token),
    );

    Page {
        html: layout(&nonce, &descriptor.title, &body),
        nonce,
        status: StatusCode::OK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_page_carries_nonce_and_rid() {
        let page = login(
            "/a/acme",
            "rid123",
            "Example RP",
            "openid email",
            &[ProviderType::Google],
        );
        assert!(page.html.contains("rid123"));
        assert!(page.html.contains(&format!("nonce=\"{}\"", page.nonce)));
        assert!(page.html.contains("/a/acme/sso/google/start?rid=rid123"));
    }

    #[test]
    fn markup_is_escaped() {
        let page = error(StatusCode::BAD_REQUEST, "<script>alert(1)</script>");
        assert!(!page.html.contains("<script>alert(1)"));
        assert!(page.html.contains("&lt;script&gt;"));
    }
}
