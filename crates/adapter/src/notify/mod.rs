pub mod telegram;

use chrono::FixedOffset;
use domain::{Comment, Sentiment, Source};

const TIME_FORMAT: &str = "%H:%M %d.%m.%Y";
/// Telegram rejects longer messages. Counted in UTF-16 units like the Bot API.
const MAX_MESSAGE_LEN: usize = 4096;
const QUOTE_OPEN: &str = "<blockquote>";
const QUOTE_CLOSE: &str = "</blockquote>";

/// A rendered alert, ready for an HTML-capable channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub comment_id: i64,
    pub html: String,
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn message_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Escape `text`, cut at a character boundary with a trailing "…" when the
/// escaped form would exceed `budget`.
fn escape_within(text: &str, budget: usize) -> String {
    let full = escape_html(text);
    if message_len(&full) <= budget {
        return full;
    }

    let limit = budget.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    let mut buf = [0u8; 4];
    for ch in text.chars() {
        let piece = escape_html(ch.encode_utf8(&mut buf));
        let len = message_len(&piece);
        if used + len > limit {
            break;
        }
        used += len;
        out.push_str(&piece);
    }
    out.push('…');
    out
}

fn author_link(comment: &Comment) -> Option<String> {
    match comment.source {
        Source::Vk => match comment.author_id.strip_prefix('-') {
            Some(group) => Some(format!("https://vk.com/club{group}")),
            None => Some(format!("https://vk.com/id{}", comment.author_id)),
        },
        Source::Telegram => comment
            .author_username
            .as_deref()
            .map(|u| format!("https://t.me/{}", u.trim_start_matches('@'))),
    }
}

/// Render a comment as an alert. Times are shown at `utc_offset_hours`.
pub fn format_alert(comment: &Comment, utc_offset_hours: i32) -> AlertMessage {
    let (badge, platform) = match comment.source {
        Source::Vk => ("🔵", "VK"),
        Source::Telegram => ("✈️", "Telegram"),
    };
    let mood = match comment.sentiment {
        Some(Sentiment::Negative) => "🔴 NEGATIVE",
        Some(Sentiment::Positive) => "🟢 POSITIVE",
        Some(Sentiment::Neutral) => "⚪ NEUTRAL",
        None => "❔ UNDEFINED",
    };
    let score = comment
        .sentiment_score
        .map(|s| format!(" ({s:.2})"))
        .unwrap_or_default();

    let time = match FixedOffset::east_opt(utc_offset_hours.clamp(-23, 23) * 3600) {
        Some(offset) => comment.created_at.with_timezone(&offset).format(TIME_FORMAT).to_string(),
        None => comment.created_at.format(TIME_FORMAT).to_string(),
    };

    let author = escape_html(&comment.author_name);
    let author = match author_link(comment) {
        Some(url) => format!("<a href=\"{}\">{}</a>", escape_html(&url), author),
        None => author,
    };

    let head = format!(
        "{badge} <b>{platform}</b> | {channel}\n👤 {author}\n🆔 <code>{author_id}</code>\n🕐 {time}\n{mood}{score}\n━━━━━━━━━━━━━━━━━━\n",
        channel = escape_html(&comment.channel_name),
        author_id = escape_html(&comment.author_id),
    );
    let mut tail = format!(
        "\n\n<a href=\"{}\">🔗 Открыть пост</a>",
        escape_html(&comment.post_url)
    );
    if comment.comment_url != comment.post_url {
        tail.push_str(&format!(
            "\n<a href=\"{}\">💬 Открыть комментарий</a>",
            escape_html(&comment.comment_url)
        ));
    }

    let body = if comment.text.trim().is_empty() {
        "<b>Пользователь прислал медиафайл, пожалуйста откройте комментарий чтобы увидеть содержание</b>".to_string()
    } else {
        let frame = message_len(&head)
            + message_len(&tail)
            + message_len(QUOTE_OPEN)
            + message_len(QUOTE_CLOSE);
        let budget = MAX_MESSAGE_LEN.saturating_sub(frame);
        format!(
            "{QUOTE_OPEN}{}{QUOTE_CLOSE}",
            escape_within(comment.text.trim(), budget)
        )
    };

    let html = format!("{head}{body}{tail}");
    AlertMessage {
        comment_id: comment.id,
        html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use domain::{NotifyStatus, ProcessingStatus, SentimentSource};

    fn comment() -> Comment {
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 21, 30, 0).unwrap();
        Comment {
            id: 7,
            source: Source::Vk,
            external_id: "123_45".into(),
            channel_name: "Город <N>".into(),
            post_id: "123".into(),
            post_url: "https://vk.com/wall-1_123".into(),
            comment_url: "https://vk.com/wall-1_123?reply=45".into(),
            author_id: "42".into(),
            author_name: "Иван & Co".into(),
            author_username: None,
            text: "ужасно!".into(),
            created_at: created,
            post_published_at: created,
            has_media: false,
            media_type: None,
            sentiment: Some(Sentiment::Negative),
            sentiment_score: Some(0.9),
            sentiment_source: SentimentSource::Auto,
            processing_status: ProcessingStatus::Done,
            retry_count: 0,
            last_error: None,
            claimed_at: None,
            notified: false,
            notify_status: None::<NotifyStatus>,
            ingested_at: created,
        }
    }

    #[test]
    fn alert_contains_escaped_fields_and_local_time() {
        let alert = format_alert(&comment(), 3);
        assert_eq!(alert.comment_id, 7);
        assert!(alert.html.contains("<b>VK</b> | Город &lt;N&gt;"));
        assert!(alert.html.contains("Иван &amp; Co"));
        assert!(alert.html.contains("https://vk.com/id42"));
        // 21:30 UTC is 00:30 the next day in Moscow
        assert!(alert.html.contains("00:30 02.06.2024"));
        assert!(alert.html.contains("NEGATIVE (0.90)"));
        assert!(alert.html.contains("<blockquote>ужасно!</blockquote>"));
        assert!(alert.html.contains("?reply=45"));
    }

    #[test]
    fn media_only_comments_get_a_placeholder() {
        let mut c = comment();
        c.text.clear();
        c.source = Source::Telegram;
        c.author_username = Some("@anna".into());
        c.comment_url = c.post_url.clone();

        let alert = format_alert(&c, 0);
        assert!(alert.html.contains("медиафайл"));
        assert!(alert.html.contains("https://t.me/anna"));
        assert!(alert.html.contains("21:30 01.06.2024"));
        assert!(!alert.html.contains("Открыть комментарий"));
    }

    #[test]
    fn long_comments_are_cut_to_fit_one_message() {
        let mut c = comment();
        c.text = "ужасно ".repeat(700);

        let alert = format_alert(&c, 3);
        assert!(message_len(&alert.html) <= MAX_MESSAGE_LEN);
        assert!(alert.html.contains("…</blockquote>"));
        assert!(alert.html.ends_with("💬 Открыть комментарий</a>"));
    }

    #[test]
    fn cutting_never_splits_an_entity() {
        let cut = escape_within("a&b", 5);
        assert_eq!(cut, "a…");
        assert_eq!(escape_within("<b>", 20), "&lt;b&gt;");
    }
}
