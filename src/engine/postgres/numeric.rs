//! `NUMERIC` binary wire format
//!
//! Header of four big-endian 16-bit fields (`ndigits`, `weight`, `sign`, `dscale`) followed by
//! `ndigits` base-10000 digits. Value = sum(digit[i] * 10000^(weight - i)).

use bytes::{BufMut, BytesMut};
use std::error::Error;
use std::fmt::Write as _;

type BoxError = Box<dyn Error + Sync + Send>;

const SIGN_POS: u16 = 0x0000;
const SIGN_NEG: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_PINF: u16 = 0xD000;
const SIGN_NINF: u16 = 0xF000;

fn read_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([raw[at], raw[at + 1]])
}

/// Decode a binary `NUMERIC` into its canonical decimal text (scale preserved)
pub fn decode(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }

    let ndigits = usize::from(read_u16(raw, 0));
    let weight = i32::from(read_u16(raw, 2) as i16);
    let sign = read_u16(raw, 4);
    let dscale = usize::from(read_u16(raw, 6));

    if raw.len() != 8 + 2 * ndigits {
        return Err("numeric digit count does not match payload".into());
    }

    match sign {
        SIGN_NAN => return Ok("NaN".to_string()),
        SIGN_PINF => return Ok("Infinity".to_string()),
        SIGN_NINF => return Ok("-Infinity".to_string()),
        SIGN_POS | SIGN_NEG => {}
        other => return Err(format!("invalid numeric sign 0x{other:04x}").into()),
    }

    let digits: Vec<u16> = (0..ndigits).map(|i| read_u16(raw, 8 + 2 * i)).collect();
    let digit_at = |idx: i32| -> u16 {
        usize::try_from(idx).ok().and_then(|i| digits.get(i).copied()).unwrap_or(0)
    };

    let mut text = String::new();
    if sign == SIGN_NEG {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        for group in 0..=weight {
            let d = digit_at(group);
            if group == 0 {
                let _ = write!(text, "{d}");
            } else {
                let _ = write!(text, "{d:04}");
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut idx = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit_at(idx));
            idx += 1;
        }
        frac.truncate(dscale);
        text.push('.');
        text.push_str(&frac);
    }

    Ok(text)
}

/// Encode decimal text (`-12.50`, `+3`, `.5`, `NaN`) as a binary `NUMERIC`
pub fn encode(text: &str, out: &mut BytesMut) -> Result<(), BoxError> {
    let text = text.trim();

    if text.eq_ignore_ascii_case("nan") {
        write_header(out, 0, 0, SIGN_NAN, 0);
        return Ok(());
    }

    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
    let valid = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !valid(int_part) || !valid(frac_part) {
        return Err(format!("'{text}' is not a decimal number").into());
    }

    let dscale = u16::try_from(frac_part.len()).map_err(|_| "numeric scale too large")?;
    let int_part = int_part.trim_start_matches('0');

    let mut padded = "0".repeat((4 - int_part.len() % 4) % 4);
    padded.push_str(int_part);
    let int_groups = padded.len() / 4;
    padded.push_str(frac_part);
    padded.push_str(&"0".repeat((4 - frac_part.len() % 4) % 4));

    let mut groups: Vec<u16> = padded
        .as_bytes()
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0')))
        .collect();

    let mut weight = i32::try_from(int_groups).map_err(|_| "numeric too large")? - 1;
    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }

    let (weight, sign) = if groups.is_empty() {
        (0, SIGN_POS)
    } else {
        (weight, if negative { SIGN_NEG } else { SIGN_POS })
    };

    let ndigits = u16::try_from(groups.len()).map_err(|_| "numeric too large")?;
    let weight = i16::try_from(weight).map_err(|_| "numeric exponent out of range")?;
    write_header(out, ndigits, weight, sign, dscale);
    for group in groups {
        out.put_u16(group);
    }
    Ok(())
}

fn write_header(out: &mut BytesMut, ndigits: u16, weight: i16, sign: u16, dscale: u16) {
    out.put_u16(ndigits);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(dscale);
}
