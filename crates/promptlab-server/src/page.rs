//! The single-page UI, rendered from an inline template

use promptlab_core::{ProfileConfig, SamplingLimits, SliderSpec, DEFAULT_PROMPT};

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{{TITLE}}</title>
<style>
  body { font-family: system-ui, sans-serif; max-width: 960px; margin: 2rem auto; padding: 0 1rem; color: #222; }
  h1 { margin-bottom: 0.25rem; }
  .desc { color: #555; }
  .model { font-size: 0.85rem; color: #777; }
  textarea { width: 100%; min-height: 6rem; font: inherit; padding: 0.5rem; box-sizing: border-box; }
  .slider { margin: 0.75rem 0; }
  .slider label { display: flex; justify-content: space-between; }
  .slider input { width: 100%; }
  button { padding: 0.5rem 1.5rem; font: inherit; cursor: pointer; }
  button:disabled { cursor: wait; opacity: 0.6; }
  .banner { margin: 1rem 0; padding: 0.5rem 0.75rem; border-radius: 4px; }
  .info { background: #eef4ff; }
  .ok { background: #e7f7ec; }
  .err { background: #fdecea; }
  .spinner { display: inline-block; width: 1em; height: 1em; border: 2px solid #999; border-top-color: transparent; border-radius: 50%; animation: spin 0.8s linear infinite; vertical-align: middle; margin-right: 0.5rem; }
  @keyframes spin { to { transform: rotate(360deg); } }
  .outputs { display: grid; grid-template-columns: repeat(var(--cols), 1fr); gap: 1rem; }
  .output { white-space: pre-wrap; background: #f7f7f7; padding: 0.75rem; border-radius: 4px; min-height: 3rem; }
  .meta { font-size: 0.8rem; color: #777; }
</style>
</head>
<body>
<h1>{{TITLE}}</h1>
<p class="desc">{{DESCRIPTION}}</p>
<p class="model">Model: {{MODEL}}</p>

<div id="status" class="banner info"><span class="spinner"></span>Loading model...</div>

<textarea id="prompt">{{PROMPT}}</textarea>

{{SLIDERS}}

<button id="generate" disabled>Generate</button>

<div id="result" class="banner" hidden></div>

<div class="outputs" style="--cols: {{COLUMNS}}">
{{OUTPUTS}}
</div>

<script>
const COMPARE = {{COMPARE}};
const statusEl = document.getElementById('status');
const resultEl = document.getElementById('result');
const button = document.getElementById('generate');

function banner(el, cls, html) {
  el.className = 'banner ' + cls;
  el.innerHTML = html;
  el.hidden = false;
}

function text(s) {
  const d = document.createElement('div');
  d.textContent = s;
  return d.innerHTML;
}

for (const input of document.querySelectorAll('.slider input')) {
  const out = document.getElementById(input.id + '-value');
  input.addEventListener('input', () => { out.textContent = input.value; });
}

async function pollStatus() {
  try {
    const res = await fetch('api/status');
    const body = await res.json();
    if (!res.ok) {
      banner(statusEl, 'err', '&#10060; ' + text(body.error));
      return;
    }
    switch (body.status.state) {
      case 'ready':
        banner(statusEl, 'ok', '&#9989; Model loaded!' + (body.device ? ' (' + body.device + ')' : ''));
        button.disabled = false;
        return;
      case 'failed':
        banner(statusEl, 'err', '&#10060; ' + text(body.message));
        button.disabled = false;
        return;
      default:
        banner(statusEl, 'info', '<span class="spinner"></span>' + text(body.message));
    }
  } catch (e) {
    banner(statusEl, 'err', '&#10060; ' + text(String(e)));
  }
  setTimeout(pollStatus, 1000);
}

function show(id, result) {
  document.getElementById(id).textContent = result.text;
  const tps = result.elapsed_ms > 0 ? (result.tokens_generated / (result.elapsed_ms / 1000)).toFixed(1) : '-';
  document.getElementById(id + '-meta').textContent =
    result.tokens_generated + ' tokens in ' + result.elapsed_ms + ' ms (' + tps + ' tok/s)';
}

button.addEventListener('click', async () => {
  button.disabled = true;
  banner(resultEl, 'info', '<span class="spinner"></span>Generating...');
  const body = {
    prompt: document.getElementById('prompt').value,
    temperature: parseFloat(document.getElementById('temperature').value),
    max_tokens: parseInt(document.getElementById('max_tokens').value, 10),
    top_p: parseFloat(document.getElementById('top_p').value),
  };
  try {
    const res = await fetch('api/generate', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify(body),
    });
    const data = await res.json();
    if (!res.ok) {
      banner(resultEl, 'err', '&#10060; ' + text(data.error));
      if (data.stage === 'load') pollStatus();
    } else {
      if (data.comparison) {
        show('out-adapted', data.comparison.adapted);
        show('out-base', data.comparison.base);
      } else {
        show('out-main', data.result);
      }
      banner(resultEl, 'ok', '&#9989; Done!');
    }
  } catch (e) {
    banner(resultEl, 'err', '&#10060; Generation failed: ' + text(String(e)));
  }
  button.disabled = false;
});

pollStatus();
</script>
</body>
</html>
"#;

pub fn render(profile: &ProfileConfig, limits: &SamplingLimits) -> String {
    let sliders = [
        slider("temperature", &limits.temperature),
        slider("max_tokens", &limits.max_tokens),
        slider("top_p", &limits.top_p),
    ]
    .join("\n");

    let (columns, outputs) = if profile.is_compare() {
        (
            2,
            [
                output("out-adapted", "Fine-tuned (LoRA)"),
                output("out-base", "Base model"),
            ]
            .join("\n"),
        )
    } else {
        (1, output("out-main", "Output"))
    };

    let model = match &profile.adapter {
        Some(adapter) if profile.is_compare() => format!("{} + {}", profile.base, adapter),
        _ => profile.base.to_string(),
    };

    TEMPLATE
        .replace("{{TITLE}}", &escape(profile.profile.title()))
        .replace("{{DESCRIPTION}}", &escape(profile.profile.description()))
        .replace("{{MODEL}}", &escape(&model))
        .replace("{{PROMPT}}", &escape(DEFAULT_PROMPT))
        .replace("{{SLIDERS}}", &sliders)
        .replace("{{COLUMNS}}", &columns.to_string())
        .replace("{{OUTPUTS}}", &outputs)
        .replace("{{COMPARE}}", if profile.is_compare() { "true" } else { "false" })
}

fn slider(id: &str, spec: &SliderSpec) -> String {
    format!(
        r#"<div class="slider">
  <label for="{id}"><span>{label}</span><span id="{id}-value">{default}</span></label>
  <input type="range" id="{id}" min="{min}" max="{max}" step="{step}" value="{default}">
</div>"#,
        id = id,
        label = escape(spec.label),
        min = spec.min,
        max = spec.max,
        step = spec.step,
        default = spec.default,
    )
}

fn output(id: &str, heading: &str) -> String {
    format!(
        r#"<section>
  <h3>{heading}</h3>
  <div id="{id}" class="output"></div>
  <div id="{id}-meta" class="meta"></div>
</section>"#,
        id = id,
        heading = escape(heading),
    )
}

/// Inputs are profile text and operator-supplied repo/file names, never
/// request data; model output is inserted client-side via `textContent`
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptlab_core::Profile;

    #[test]
    fn test_single_model_page() {
        let html = render(
            &ProfileConfig::preset(Profile::Gguf),
            &SamplingLimits::default(),
        );

        assert!(html.contains("<title>CPU GGUF Demo</title>"));
        assert!(html.contains(DEFAULT_PROMPT));
        assert!(html.contains(r#"id="temperature" min="0.1" max="2" step="0.1" value="1""#));
        assert!(html.contains(r#"id="max_tokens" min="32" max="512" step="16" value="128""#));
        assert!(html.contains(r#"id="top_p" min="0.1" max="1" step="0.05" value="0.9""#));
        assert!(html.contains("Jeppcode/ScalableLab2/model-q4_k_m.gguf"));
        assert!(html.contains("const COMPARE = false;"));
        assert!(html.contains(r#"id="out-main""#));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn test_compare_page_has_two_columns() {
        let html = render(
            &ProfileConfig::preset(Profile::LoraCompare),
            &SamplingLimits::default(),
        );

        assert!(html.contains("--cols: 2"));
        assert!(html.contains(r#"id="out-adapted""#));
        assert!(html.contains(r#"id="out-base""#));
        assert!(html.contains("const COMPARE = true;"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<b>\"a\" & 'b'</b>"), "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;");
    }
}
