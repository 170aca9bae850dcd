use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use rand::seq::IndexedRandom;

const CORE_WORDS: &[&str] = &[
    "__value",
    "_data-enctype",
    "_data-margin",
    "_style",
    "_transform",
    "_value",
    "className",
    "color",
    "currentTime",
    "dataset",
    "disabled",
    "enctype",
    "href",
    "innerHTML",
    "method",
    "multiple",
    "name",
    "naturalHeight",
    "naturalWidth",
    "offsetWidth",
    "onclick",
    "onerror",
    "options",
    "padding",
    "paused",
    "placeholder",
    "position",
    "scrollLeft",
    "title",
    "transform",
    "type",
    "width",
    "zIndex",
    "volume",
];

const MODIFIERS: &[&str] = &[
    "InnerHTML", "Children", "Style", "Options", "Disabled", "Onload", "Volume", "Alt",
];

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Synthesizes a browser-side diagnostic string and returns it base64 encoded.
pub fn fallback_tag<R: Rng + ?Sized>(rng: &mut R) -> String {
    let message = format!(
        "e:TypeError: Cannot read properties of null (reading '{}')",
        error_filler(rng)
    );
    STANDARD.encode(message)
}

fn error_filler<R: Rng + ?Sized>(rng: &mut R) -> String {
    let word = CORE_WORDS.choose(rng).copied().unwrap_or("value");
    let roll: f64 = rng.random();
    if roll < 0.40 {
        format!("{word}_{}", random_part(rng, 4, 4))
    } else if roll < 0.65 {
        word.to_string()
    } else if roll < 0.85 {
        random_part(rng, 8, 12)
    } else if roll < 0.95 {
        if rng.random_bool(0.5) {
            format!("{word}[{}]", rng.random_range(0..=2))
        } else {
            format!("{word}['{}']", random_part(rng, 4, 4))
        }
    } else {
        let modifier = MODIFIERS.choose(rng).copied().unwrap_or("Style");
        format!("{}{modifier}", word.to_lowercase())
    }
}

fn random_part<R: Rng + ?Sized>(rng: &mut R, min: usize, max: usize) -> String {
    let len = rng.random_range(min..=max);
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}
