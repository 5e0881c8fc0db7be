//! Built-in error page, used when the application has not registered an
//! error handler or when the registered one fails.

use crate::server::response::status_reason;
use crate::server::ResponseWriter;
use std::io::Write;
use tracing::warn;

pub(crate) fn write_default(
    response: &mut ResponseWriter,
    status: u16,
    message: &str,
    details: &[String],
) {
    response.set_status(status);
    response.set_header("Content-Type", "text/html; charset=utf-8");
    let mut page = format!(
        "<!DOCTYPE html>\n<html><head><title>{status} {reason}</title></head>\n\
         <body>\n<h1>{status} {reason}</h1>\n<p>{message}</p>\n",
        reason = status_reason(status),
        message = escape(message),
    );
    if !details.is_empty() {
        page.push_str("<ul>\n");
        for detail in details {
            page.push_str(&format!("<li>{}</li>\n", escape(detail)));
        }
        page.push_str("</ul>\n");
    }
    page.push_str("</body></html>\n");
    if let Err(e) = response.write_all(page.as_bytes()) {
        warn!(status, error = %e, "could not write error page");
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_status_and_details() {
        let mut response = ResponseWriter::buffer();
        write_default(&mut response, 404, "no such page", &["tried /x".to_string()]);
        let out = String::from_utf8(response.buffered().unwrap().to_vec()).unwrap();
        assert!(out.starts_with("HTTP/1.1 404 Not Found"));
        assert!(out.contains("<h1>404 Not Found</h1>"));
        assert!(out.contains("<li>tried /x</li>"));
    }

    #[test]
    fn escapes_markup_in_message() {
        let mut response = ResponseWriter::buffer();
        write_default(&mut response, 400, "<script>", &[]);
        let out = String::from_utf8(response.buffered().unwrap().to_vec()).unwrap();
        assert!(out.contains("&lt;script&gt;"));
        assert!(!out.contains("<script>"));
    }
}
