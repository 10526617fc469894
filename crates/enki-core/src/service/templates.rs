//! HTML templates for the web interface.
//!
//! Simple inline HTML without a template engine. Every user-supplied value is
//! escaped with [`escape_html`].

use crate::catalog::CatalogEntry;
use crate::session::TranscriptEntry;
use crate::types::{Provider, Role};
use crate::util::escape_html;

/// Common CSS styles for all pages
const COMMON_STYLES: &str = r#"
    body {
        font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "Helvetica Neue", Arial, sans-serif;
        max-width: 960px;
        margin: 32px auto;
        padding: 0 20px;
        background: #f4f5f7;
        color: #222;
    }
    .container {
        background: white;
        padding: 28px;
        border-radius: 8px;
        box-shadow: 0 2px 4px rgba(0,0,0,0.08);
    }
    h1 { margin-top: 0; border-bottom: 2px solid #3b5bdb; padding-bottom: 8px; }
    .form-group { margin: 14px 0; }
    label { display: block; font-weight: 600; margin-bottom: 4px; }
    input[type="text"], input[type="password"], input[type="email"], select, textarea {
        width: 100%;
        padding: 9px;
        border: 1px solid #ccd;
        border-radius: 4px;
        font-size: 14px;
        box-sizing: border-box;
    }
    button {
        background: #3b5bdb;
        color: white;
        padding: 9px 18px;
        border: none;
        border-radius: 4px;
        cursor: pointer;
        font-weight: 600;
    }
    button.secondary { background: #868e96; }
    .error { color: #c92a2a; background: #fff5f5; padding: 10px; border-radius: 4px; margin: 10px 0; }
    .warning { color: #8a6d00; background: #fff9db; padding: 10px; border-radius: 4px; margin: 10px 0; }
    .notice { color: #2b8a3e; background: #ebfbee; padding: 10px; border-radius: 4px; margin: 10px 0; }
    .layout { display: grid; grid-template-columns: 260px 1fr; gap: 20px; }
    .sidebar { background: #f8f9fa; padding: 16px; border-radius: 6px; }
    .transcript { min-height: 240px; max-height: 60vh; overflow-y: auto; margin-bottom: 12px; }
    .msg { padding: 10px 12px; border-radius: 6px; margin: 8px 0; white-space: pre-wrap; }
    .msg.user { background: #e7f5ff; }
    .msg.assistant { background: #f1f3f5; }
    .msg.failed { background: #fff5f5; color: #c92a2a; }
    .msg img { max-width: 240px; display: block; margin-top: 6px; }
    .row { display: flex; gap: 8px; align-items: center; }
    .muted { color: #868e96; font-size: 13px; }
"#;

/// Streams replies from `/api/chat` into the transcript.
const CHAT_SCRIPT: &str = r#"
(function () {
  const form = document.getElementById('chat-form');
  const input = document.getElementById('message');
  const file = document.getElementById('image');
  const transcript = document.getElementById('transcript');

  function bubble(role, text) {
    const div = document.createElement('div');
    div.className = 'msg ' + role;
    div.textContent = text;
    transcript.appendChild(div);
    transcript.scrollTop = transcript.scrollHeight;
    return div;
  }

  function readImage() {
    return new Promise((resolve, reject) => {
      if (!file || !file.files.length) return resolve(null);
      const reader = new FileReader();
      reader.onload = () => {
        const [head, data] = String(reader.result).split(',');
        resolve({ media_type: head.slice(5, head.indexOf(';')), data: data });
      };
      reader.onerror = reject;
      reader.readAsDataURL(file.files[0]);
    });
  }

  form.addEventListener('submit', async (ev) => {
    ev.preventDefault();
    const message = input.value;
    const image = await readImage();
    if (!message.trim() && !image) return;

    const mine = bubble('user', message);
    if (image) {
      const img = document.createElement('img');
      img.src = 'data:' + image.media_type + ';base64,' + image.data;
      mine.appendChild(img);
    }
    input.value = '';
    if (file) file.value = '';
    const reply = bubble('assistant', '');

    const resp = await fetch('/api/chat', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({ message: message, image: image }),
    });
    if (!resp.ok) {
      const body = await resp.json().catch(() => ({ error: resp.statusText }));
      mine.remove();
      reply.className = 'msg failed';
      reply.textContent = body.error;
      return;
    }

    const reader = resp.body.getReader();
    const decoder = new TextDecoder();
    let buf = '';
    for (;;) {
      const { value, done } = await reader.read();
      if (done) break;
      buf += decoder.decode(value, { stream: true });
      let cut;
      while ((cut = buf.indexOf('\n\n')) >= 0) {
        const raw = buf.slice(0, cut);
        buf = buf.slice(cut + 2);
        let event = 'message', data = '';
        for (const line of raw.split('\n')) {
          if (line.startsWith('event:')) event = line.slice(6).trim();
          else if (line.startsWith('data:')) data += line.slice(5).trim();
        }
        if (event === 'chunk') {
          reply.textContent += JSON.parse(data);
        } else if (event === 'error') {
          reply.className = 'msg failed';
          reply.textContent = JSON.parse(data);
        }
        transcript.scrollTop = transcript.scrollHeight;
      }
    }
  });
})();
"#;

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Enki - {title}</title>
    <style>{COMMON_STYLES}</style>
</head>
<body>
{body}
</body>
</html>"#,
        title = escape_html(title),
    )
}

fn message_html(class: &str, text: Option<&str>) -> String {
    text.map_or(String::new(), |t| {
        format!(r#"<div class="{class}">{}</div>"#, escape_html(t))
    })
}

/// Render the login page
pub fn login_page(error: Option<&str>, notice: Option<&str>) -> String {
    let error_html = message_html("error", error);
    let notice_html = message_html("notice", notice);
    page(
        "Login",
        &format!(
            r#"<div class="container">
        <h1>Enki Chat</h1>
        <h2>Login</h2>
        {notice_html}
        {error_html}
        <form method="POST" action="/login">
            <div class="form-group">
                <label for="username">Username</label>
                <input type="text" id="username" name="username" required autofocus>
            </div>
            <div class="form-group">
                <label for="password">Password</label>
                <input type="password" id="password" name="password" required>
            </div>
            <button type="submit">Login</button>
        </form>
        <p style="margin-top: 20px; text-align: center;">
            Don't have an account? <a href="/register">Register here</a>
        </p>
    </div>"#
        ),
    )
}

/// Values echoed back into the registration form after a failed attempt.
#[derive(Debug, Default)]
pub struct RegisterValues<'a> {
    pub username: &'a str,
    pub name: &'a str,
    pub email: &'a str,
}

/// Render the registration page
pub fn register_page(error: Option<&str>, values: &RegisterValues<'_>) -> String {
    let error_html = message_html("error", error);
    page(
        "Register",
        &format!(
            r#"<div class="container">
        <h1>Enki Chat</h1>
        <h2>Register New Account</h2>
        {error_html}
        <form method="POST" action="/register">
            <div class="form-group">
                <label for="username">Username</label>
                <input type="text" id="username" name="username" value="{username}" required autofocus>
            </div>
            <div class="form-group">
                <label for="name">Name</label>
                <input type="text" id="name" name="name" value="{name}" required>
            </div>
            <div class="form-group">
                <label for="email">Email</label>
                <input type="email" id="email" name="email" value="{email}">
            </div>
            <div class="form-group">
                <label for="password">Password</label>
                <input type="password" id="password" name="password" required>
            </div>
            <div class="form-group">
                <label for="password_confirm">Confirm Password</label>
                <input type="password" id="password_confirm" name="password_confirm" required>
            </div>
            <button type="submit">Create Account</button>
        </form>
        <form method="POST" action="/register/back" style="margin-top: 12px;">
            <button type="submit" class="secondary">Back to login</button>
        </form>
    </div>"#,
            username = escape_html(values.username),
            name = escape_html(values.name),
            email = escape_html(values.email),
        ),
    )
}

/// Everything the chat page shows.
pub struct ChatView<'a> {
    pub display_name: &'a str,
    pub provider: Provider,
    /// Selection list for the current provider, headers included.
    pub entries: Vec<CatalogEntry>,
    pub selected_model: Option<&'a str>,
    pub vision: bool,
    pub transcript: Vec<&'a TranscriptEntry>,
    /// Masked key per provider; empty when not configured.
    pub key_hints: Vec<(Provider, String)>,
    pub warning: Option<&'a str>,
    pub notice: Option<&'a str>,
}

/// Render the authenticated chat page
pub fn chat_page(view: &ChatView<'_>) -> String {
    let provider_options: String = Provider::ALL
        .iter()
        .map(|p| {
            let selected = if *p == view.provider { " selected" } else { "" };
            format!(r#"<option value="{}"{selected}>{}</option>"#, p.key(), p.display_name())
        })
        .collect();

    let selected_index = view.selected_model.and_then(|id| {
        view.entries
            .iter()
            .position(|e| matches!(e, CatalogEntry::Model(m) if m == id))
    });
    let model_options: String = view
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let selected = if Some(i) == selected_index { " selected" } else { "" };
            let label = escape_html(&entry.to_string()).replace(' ', "&nbsp;");
            format!(r#"<option value="{i}"{selected}>{label}</option>"#)
        })
        .collect();

    let key_inputs: String = view
        .key_hints
        .iter()
        .map(|(p, hint)| {
            let placeholder = if hint.is_empty() {
                "not set".to_string()
            } else {
                escape_html(hint)
            };
            format!(
                r#"<div class="form-group">
                <label for="key-{key}">{name} API key</label>
                <input type="password" id="key-{key}" name="{key}" placeholder="{placeholder}" autocomplete="off">
            </div>"#,
                key = p.key(),
                name = p.display_name(),
            )
        })
        .collect();

    let clear_forms: String = view
        .key_hints
        .iter()
        .filter(|(_, hint)| !hint.is_empty())
        .map(|(p, _)| {
            format!(
                r#"<form method="POST" action="/settings/keys" style="margin-top: 8px;">
                    <input type="hidden" name="clear" value="{key}">
                    <button type="submit" class="secondary">Clear {name} key</button>
                </form>"#,
                key = p.key(),
                name = p.display_name(),
            )
        })
        .collect();

    let transcript_html: String = view
        .transcript
        .iter()
        .map(|entry| {
            let role = match entry.role {
                Role::User => "user",
                _ => "assistant",
            };
            let image = entry.image.as_ref().map_or(String::new(), |img| {
                format!(r#"<img src="{}" alt="attachment">"#, escape_html(&img.data_url()))
            });
            format!(
                r#"<div class="msg {role}">{}{image}</div>"#,
                escape_html(&entry.text)
            )
        })
        .collect();

    let image_input = if view.vision {
        r#"<input type="file" id="image" accept="image/png,image/jpeg,image/gif,image/webp">"#
    } else {
        r#"<span class="muted">This model does not accept images.</span>"#
    };

    page(
        "Chat",
        &format!(
            r#"<div class="container">
        <div class="row" style="justify-content: space-between;">
            <h1>Enki Chat</h1>
            <form method="POST" action="/logout"><button type="submit" class="secondary">Logout</button></form>
        </div>
        <p>Signed in as <strong>{display_name}</strong></p>
        {warning_html}
        {notice_html}
        <div class="layout">
            <div class="sidebar">
                <form method="POST" action="/chat/model">
                    <div class="form-group">
                        <label for="provider">Provider</label>
                        <select id="provider" name="provider" onchange="this.form.submit()">{provider_options}</select>
                    </div>
                    <div class="form-group">
                        <label for="model">Choose model</label>
                        <select id="model" name="model" onchange="this.form.submit()">{model_options}</select>
                    </div>
                    <noscript><button type="submit">Apply</button></noscript>
                </form>
                <h3>Settings</h3>
                <form method="POST" action="/settings/keys">
                    {key_inputs}
                    <button type="submit">Save API keys</button>
                </form>
                {clear_forms}
            </div>
            <div>
                <div id="transcript" class="transcript">{transcript_html}</div>
                <form id="chat-form">
                    <div class="form-group">
                        <textarea id="message" name="message" rows="3" placeholder="Type your message"></textarea>
                    </div>
                    <div class="row">
                        <button type="submit">Send</button>
                        {image_input}
                    </div>
                </form>
                <form method="POST" action="/chat/clear" style="margin-top: 8px;">
                    <button type="submit" class="secondary">Clear chat</button>
                </form>
            </div>
        </div>
    </div>
    <script>{CHAT_SCRIPT}</script>"#,
            display_name = escape_html(view.display_name),
            warning_html = message_html("warning", view.warning),
            notice_html = message_html("notice", view.notice),
        ),
    )
}
