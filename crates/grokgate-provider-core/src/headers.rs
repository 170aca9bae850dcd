pub type Headers = Vec<(String, String)>;

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    if let Some((_, v)) = headers
        .iter_mut()
        .find(|(k, _)| k.eq_ignore_ascii_case(&name))
    {
        *v = value;
        return;
    }
    headers.push((name, value));
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn header_remove(headers: &mut Headers, name: &str) -> Option<String> {
    let idx = headers
        .iter()
        .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
    Some(headers.remove(idx).1)
}

/// Appends `extra` to the `cookie` header, joining with `; `.
pub fn cookie_append(headers: &mut Headers, extra: &str) {
    let extra = extra.trim().trim_start_matches(';').trim();
    if extra.is_empty() {
        return;
    }
    let merged = match header_get(headers, "cookie") {
        Some(current) if !current.trim().is_empty() => {
            format!("{}; {extra}", current.trim_end().trim_end_matches(';'))
        }
        _ => extra.to_string(),
    };
    header_set(headers, "cookie", merged);
}
