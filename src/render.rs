//! Kotlin source text for finished programs
//!
//! One fixed template per statement kind, bodies indented four spaces
//! under their keyword. The root scope renders as `runBlocking`; the
//! try/catch handler is the fixed caught-error print, matching what
//! evaluation emits when a catch fires.

use crate::interpreter::CAUGHT_TEXT;
use crate::program::Statement;

/// Render `tree` as the displayable program text. The tree is expected
/// to be a root scope; anything else renders as an empty `runBlocking`.
pub fn render(tree: &Statement) -> String {
    let mut lines = Vec::new();
    lines.push("runBlocking {".to_string());
    if let Some(body) = tree.body() {
        for statement in body {
            render_into(statement, 1, &mut lines);
        }
    }
    lines.push("}".to_string());
    lines.join("\n")
}

fn render_into(statement: &Statement, depth: usize, lines: &mut Vec<String>) {
    let pad = indent(depth);
    match statement {
        Statement::Delay { millis } => lines.push(format!("{}delay({})", pad, millis)),
        Statement::Print { text } => lines.push(format!("{}println(\"{}\")", pad, text)),
        Statement::ThrowError { cancellation } => {
            if *cancellation {
                lines.push(format!("{}throw CancellationException()", pad));
            } else {
                lines.push(format!("{}throw Exception()", pad));
            }
        }
        Statement::Join { name } => lines.push(format!("{}{}.join()", pad, name)),
        Statement::Cancel { name } => lines.push(format!("{}{}.cancel()", pad, name)),
        Statement::AwaitPrint { name } => {
            lines.push(format!("{}println({}.await())", pad, name))
        }
        Statement::Scope { body } => {
            braced(lines, &pad, "coroutineScope {".to_string(), body, depth)
        }
        Statement::Task { body } => braced(lines, &pad, "launch {".to_string(), body, depth),
        Statement::NamedTask { name, body } => {
            braced(lines, &pad, format!("val {} = launch {{", name), body, depth)
        }
        Statement::Deferred { name, result, body } => {
            lines.push(format!("{}val {} = async {{", pad, name));
            for child in body {
                render_into(child, depth + 1, lines);
            }
            // the result literal is the async block's final expression
            lines.push(format!("{}\"{}\"", indent(depth + 1), result));
            lines.push(format!("{}}}", pad));
        }
        Statement::TryCatch { body } => {
            lines.push(format!("{}try {{", pad));
            for child in body {
                render_into(child, depth + 1, lines);
            }
            lines.push(format!("{}}} catch (e: Exception) {{", pad));
            lines.push(format!("{}println(\"{}\")", indent(depth + 1), CAUGHT_TEXT));
            lines.push(format!("{}}}", pad));
        }
        Statement::Supervised { body } => {
            braced(lines, &pad, "supervisorScope {".to_string(), body, depth)
        }
    }
}

fn braced(lines: &mut Vec<String>, pad: &str, opener: String, body: &[Statement], depth: usize) {
    lines.push(format!("{}{}", pad, opener));
    for child in body {
        render_into(child, depth + 1, lines);
    }
    lines.push(format!("{}}}", pad));
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}
