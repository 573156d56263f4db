const REPLY_PREFIXES: [&str; 4] = ["re:", "fwd:", "fw:", "aw:"];

/// Providers that ignore dots in the local part
const DOTLESS_DOMAINS: [&str; 2] = ["gmail.com", "googlemail.com"];

/// Key used to recognise the same parent or colleague across messages.
///
/// Case, `+tag` subaddresses and (for Gmail) dots in the local part all reach
/// the same mailbox, so they are folded away.
pub fn normalize_email(address: &str) -> String {
    let lowered = address.trim().to_lowercase();
    let Some(at) = lowered.rfind('@') else {
        return lowered;
    };
    let (local, domain) = (&lowered[..at], &lowered[at + 1..]);

    let base = local.split('+').next().unwrap_or(local);
    let base: String = if DOTLESS_DOMAINS.contains(&domain) {
        base.chars().filter(|c| *c != '.').collect()
    } else {
        base.to_string()
    };

    format!("{base}@{domain}")
}

/// Subject used to match replies that carry no In-Reply-To header
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject.trim();

    'strip: loop {
        for prefix in REPLY_PREFIXES {
            let matches = rest
                .get(..prefix.len())
                .map_or(false, |head| head.eq_ignore_ascii_case(prefix));
            if matches {
                rest = rest[prefix.len()..].trim_start();
                continue 'strip;
            }
        }
        break;
    }

    rest.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Message-IDs are stored without angle brackets
pub fn normalize_message_id(raw: &str) -> Option<String> {
    let id = raw.trim().trim_start_matches('<').trim_end_matches('>').trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// All `<id>` tokens of a References / In-Reply-To header
pub fn message_ids(header: &str) -> Vec<String> {
    let ids: Vec<String> = header
        .split('<')
        .skip(1)
        .filter_map(|chunk| chunk.split_once('>'))
        .filter_map(|(id, _)| normalize_message_id(id))
        .collect();

    if ids.is_empty() {
        // Some clients omit the brackets
        header.split_whitespace().filter_map(normalize_message_id).collect()
    } else {
        ids
    }
}

/// Single-line preview, at most `max_chars` characters
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_chars {
        format!("{}...", collapsed.chars().take(max_chars).collect::<String>())
    } else {
        collapsed
    }
}
