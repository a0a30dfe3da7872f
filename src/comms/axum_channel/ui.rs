//! Root chat page for the axum channel.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};

use super::AxumState;

const EXAMPLE_PROMPTS: [&str; 3] = [
    "I have fever and chills",
    "Patient presents Skin rash and itching",
    "Patient presents Stomach pain and vomiting",
];

const CHAT_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>{{bot_name}}</title>
  <style>
    *, *::before, *::after { box-sizing: border-box; }
    body { font-family: system-ui, -apple-system, sans-serif; background: #0f0f0f; color: #e0e0e0; margin: 0; }
    main { max-width: 760px; margin: 0 auto; padding: 1.5rem; }
    h1 { font-size: 1.4rem; margin: 0 0 0.25rem; }
    .note { color: #888; font-size: 0.85rem; margin-bottom: 1rem; }
    #log { border: 1px solid #333; border-radius: 10px; background: #1a1a1a; min-height: 320px; padding: 1rem; overflow-y: auto; }
    .msg { white-space: pre-wrap; margin: 0 0 0.9rem; line-height: 1.4; }
    .you { color: #9ecbff; }
    .bot.emergency { color: #ff8a80; }
    form { display: flex; flex-wrap: wrap; gap: 0.5rem; margin-top: 0.75rem; }
    input[type=text] { flex: 1 1 60%; padding: 0.6rem; border-radius: 8px; border: 1px solid #444; background: #111; color: inherit; }
    button { padding: 0.6rem 1rem; border-radius: 8px; border: 1px solid #555; background: #2a2a2a; color: inherit; cursor: pointer; }
    .examples button { font-size: 0.8rem; margin: 0.5rem 0.4rem 0 0; }
    label { font-size: 0.85rem; color: #aaa; }
  </style>
</head>
<body>
<main>
  <h1>{{bot_name}}</h1>
  <p class="note">Describe your symptoms, optionally with a photo. This assistant does not replace a doctor.</p>
  <div id="log"></div>
  <form id="chat">
    <input type="text" id="message" placeholder="Describe your symptoms..." autocomplete="off" />
    <button type="submit">Send</button>
    <input type="file" id="image" accept="image/*" />
    <label><input type="checkbox" id="voice" /> voice transcript</label>
  </form>
  <div class="examples">{{examples}}</div>
</main>
<script>
  const log = document.getElementById('log');
  const history = [];

  function append(cls, text) {
    const div = document.createElement('div');
    div.className = 'msg ' + cls;
    div.textContent = text;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function readImage(file) {
    return new Promise((resolve, reject) => {
      const reader = new FileReader();
      reader.onload = () => resolve(reader.result);
      reader.onerror = reject;
      reader.readAsDataURL(file);
    });
  }

  async function send(message) {
    const fileInput = document.getElementById('image');
    const body = { message, voice: document.getElementById('voice').checked, history: history.slice(-6) };
    if (fileInput.files.length > 0) {
      body.image_base64 = await readImage(fileInput.files[0]);
      fileInput.value = '';
    }
    append('you', 'You: ' + (message || '(image)'));
    try {
      const res = await fetch('/api/message', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify(body),
      });
      const data = await res.json();
      if (!res.ok) {
        append('bot', data.reply || ('Error: ' + (data.message || res.status)));
        return;
      }
      append('bot' + (data.emergency ? ' emergency' : ''), data.reply);
      history.push({ user: message, assistant: data.reply });
    } catch (err) {
      append('bot', 'Error: ' + err);
    }
  }

  document.getElementById('chat').addEventListener('submit', (e) => {
    e.preventDefault();
    const input = document.getElementById('message');
    const message = input.value;
    input.value = '';
    send(message);
  });

  document.querySelectorAll('.examples button').forEach((b) => {
    b.addEventListener('click', () => send(b.textContent));
  });
</script>
</body>
</html>
"#;

/// GET /
pub(super) async fn root(State(state): State<AxumState>) -> impl IntoResponse {
    Html(render_page(&state.bot_name))
}

fn render_page(bot_name: &str) -> String {
    let examples: String = EXAMPLE_PROMPTS
        .iter()
        .map(|p| format!("<button type=\"button\">{p}</button>"))
        .collect();
    CHAT_HTML
        .replace("{{bot_name}}", &escape_html(bot_name))
        .replace("{{examples}}", &examples)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_lists_examples_and_escapes_name() {
        let html = render_page("<triage>");
        assert!(html.contains("&lt;triage&gt;"));
        for prompt in EXAMPLE_PROMPTS {
            assert!(html.contains(prompt));
        }
        assert!(!html.contains("{{"));
    }
}
