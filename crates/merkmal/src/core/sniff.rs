//! Content-type sniffing from the leading bytes of a stream.
//!
//! The dispatcher peeks at most [`SNIFF_LEN`] bytes before fanning the
//! stream out and derives an initial content-type hint from them. The hint
//! feeds the per-action applicability predicates; it is deliberately coarse
//! and is superseded by whatever the actions report.
//!
//! The table follows the WHATWG mime-sniffing signatures: exact magic
//! prefixes first, masked matches for container formats, then a
//! whitespace-tolerant scan for markup, and finally a binary-vs-text
//! decision. Unknown binary data yields `application/octet-stream`.

/// Number of leading bytes considered by [`detect_content_type`].
pub const SNIFF_LEN: usize = 512;

struct ExactSig {
    prefix: &'static [u8],
    content_type: &'static str,
}

struct MaskedSig {
    mask: &'static [u8],
    pattern: &'static [u8],
    content_type: &'static str,
}

const EXACT_SIGS: &[ExactSig] = &[
    ExactSig {
        prefix: b"%PDF-",
        content_type: "application/pdf",
    },
    ExactSig {
        prefix: b"%!PS-Adobe-",
        content_type: "application/postscript",
    },
    ExactSig {
        prefix: b"\x89PNG\r\n\x1a\n",
        content_type: "image/png",
    },
    ExactSig {
        prefix: b"GIF87a",
        content_type: "image/gif",
    },
    ExactSig {
        prefix: b"GIF89a",
        content_type: "image/gif",
    },
    ExactSig {
        prefix: b"\xff\xd8\xff",
        content_type: "image/jpeg",
    },
    ExactSig {
        prefix: b"BM",
        content_type: "image/bmp",
    },
    ExactSig {
        prefix: b"II*\x00",
        content_type: "image/tiff",
    },
    ExactSig {
        prefix: b"MM\x00*",
        content_type: "image/tiff",
    },
    ExactSig {
        prefix: b"PK\x03\x04",
        content_type: "application/zip",
    },
    ExactSig {
        prefix: b"\x1f\x8b\x08",
        content_type: "application/x-gzip",
    },
    ExactSig {
        prefix: b"7z\xbc\xaf\x27\x1c",
        content_type: "application/x-7z-compressed",
    },
    ExactSig {
        prefix: b"Rar!\x1a\x07",
        content_type: "application/x-rar-compressed",
    },
    ExactSig {
        prefix: b"\x00\x01\x00\x00",
        content_type: "font/ttf",
    },
    ExactSig {
        prefix: b"OTTO",
        content_type: "font/otf",
    },
    ExactSig {
        prefix: b"wOFF",
        content_type: "font/woff",
    },
    ExactSig {
        prefix: b"wOF2",
        content_type: "font/woff2",
    },
    ExactSig {
        prefix: b"OggS\x00",
        content_type: "application/ogg",
    },
    ExactSig {
        prefix: b"fLaC",
        content_type: "audio/x-flac",
    },
    ExactSig {
        prefix: b"ID3",
        content_type: "audio/mpeg",
    },
    ExactSig {
        prefix: b"\x1aE\xdf\xa3",
        content_type: "video/webm",
    },
    ExactSig {
        prefix: b"\x7fELF",
        content_type: "application/octet-stream",
    },
];

const MASKED_SIGS: &[MaskedSig] = &[
    // RIFF containers: WAVE and AVI
    MaskedSig {
        mask: b"\xff\xff\xff\xff\x00\x00\x00\x00\xff\xff\xff\xff",
        pattern: b"RIFF\x00\x00\x00\x00WAVE",
        content_type: "audio/wave",
    },
    MaskedSig {
        mask: b"\xff\xff\xff\xff\x00\x00\x00\x00\xff\xff\xff\xff",
        pattern: b"RIFF\x00\x00\x00\x00AVI ",
        content_type: "video/avi",
    },
    MaskedSig {
        mask: b"\xff\xff\xff\xff\x00\x00\x00\x00\xff\xff\xff\xff",
        pattern: b"RIFF\x00\x00\x00\x00WEBP",
        content_type: "image/webp",
    },
    // ISO base media: the ftyp box sits at offset 4
    MaskedSig {
        mask: b"\x00\x00\x00\x00\xff\xff\xff\xff",
        pattern: b"\x00\x00\x00\x00ftyp",
        content_type: "video/mp4",
    },
];

const MARKUP_SIGS: &[(&[u8], &str)] = &[
    (b"<?xml", "text/xml; charset=utf-8"),
    (b"<!DOCTYPE HTML", "text/html; charset=utf-8"),
    (b"<HTML", "text/html; charset=utf-8"),
    (b"<HEAD", "text/html; charset=utf-8"),
    (b"<BODY", "text/html; charset=utf-8"),
    (b"<SCRIPT", "text/html; charset=utf-8"),
];

fn matches_masked(data: &[u8], sig: &MaskedSig) -> bool {
    if data.len() < sig.pattern.len() {
        return false;
    }
    sig.mask
        .iter()
        .zip(sig.pattern.iter())
        .zip(data.iter())
        .all(|((mask, pattern), byte)| byte & mask == *pattern)
}

/// ASCII-case-insensitive prefix comparison for the markup signatures.
fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len()
        && data
            .iter()
            .zip(prefix.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

fn looks_binary(data: &[u8]) -> bool {
    data.iter().any(|&b| {
        b <= 0x08 || b == 0x0b || (0x0e..=0x1a).contains(&b) || (0x1c..=0x1f).contains(&b)
    })
}

/// Detect a content type from at most the first [`SNIFF_LEN`] bytes.
///
/// Always returns a valid mime string; empty input yields
/// `text/plain; charset=utf-8` (an empty stream carries no evidence of
/// binary content). Callers that need the bare media type strip the
/// parameter with [`clear_mime`].
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    for sig in EXACT_SIGS {
        if data.starts_with(sig.prefix) {
            return sig.content_type;
        }
    }
    for sig in MASKED_SIGS {
        if matches_masked(data, sig) {
            return sig.content_type;
        }
    }

    let trimmed = {
        let start = data
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(data.len());
        &data[start..]
    };
    for (prefix, content_type) in MARKUP_SIGS {
        if starts_with_ignore_case(trimmed, prefix) {
            return content_type;
        }
    }

    // UTF BOMs imply text regardless of payload
    if data.starts_with(&[0xef, 0xbb, 0xbf]) || data.starts_with(&[0xfe, 0xff]) || data.starts_with(&[0xff, 0xfe]) {
        return "text/plain; charset=utf-8";
    }

    if looks_binary(data) {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

/// Strip parameters and pick the first parseable entry of a possibly
/// comma-separated content-type header value.
pub fn clear_mime(mimetype: &str) -> String {
    for part in mimetype.split(',') {
        let media_type = part.split(';').next().unwrap_or("").trim();
        if !media_type.is_empty() && media_type.contains('/') {
            return media_type.to_ascii_lowercase();
        }
    }
    mimetype.trim().to_string()
}
