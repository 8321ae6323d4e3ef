// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Grammar for the two fields read out of Adams input files: the model reference in a
//! control file (`.acf`) and the thread count in a model file (`.adm`).
//!
//! A control file names its model either on its first line (a bare path) or in a
//! `file/... model = <path>` command. The first line always wins when it is not blank.

use std::ops::Range;

use thiserror::Error;

pub const DEFAULT_THREAD_COUNT: u32 = 1;

const DIRECTIVE_PREFIX: &str = "file/";
const MODEL_KEY: &str = "model";
const THREADS_KEY: &str = "nthreads";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlFileError {
    #[error("no model reference found (expected a model path on the first line or a `file/model=` command)")]
    NoModelReference,
    #[error("no model reference to rewrite (first line is blank and there is no `file/model=` command)")]
    MalformedControlFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceForm {
    FirstLine,
    Directive,
}

/// Location of the model path inside the control file text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReference<'a> {
    pub path: &'a str,
    /// Byte range of `path` in the full text.
    pub span: Range<usize>,
    pub form: ReferenceForm,
}

#[derive(Debug, Clone, Copy)]
enum ValueGrammar {
    /// Everything up to a comma or the end of the line, trailing blanks dropped.
    UntilComma,
    /// ASCII digits not followed by a word character.
    Digits,
}

/// Lines with their byte offset, without `\n` or `\r\n` terminators.
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |raw| {
        let start = offset;
        offset += raw.len();
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let line = line.strip_suffix('\r').unwrap_or(line);
        (start, line)
    })
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Finds `<key>[ \t]*=[ \t]*<value>` in `line` at or after `from`, ignoring ASCII case.
/// Returns the byte range of the value within `line`.
fn find_assignment(
    line: &str,
    from: usize,
    key: &str,
    grammar: ValueGrammar,
) -> Option<Range<usize>> {
    let lower = line.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut pos = from;

    while pos <= lower.len() {
        let idx = pos + lower.get(pos..)?.find(key)?;
        pos = idx + 1;

        let mut cursor = idx + key.len();
        while cursor < bytes.len() && is_blank(bytes[cursor]) {
            cursor += 1;
        }
        if bytes.get(cursor) != Some(&b'=') {
            continue;
        }
        cursor += 1;
        while cursor < bytes.len() && is_blank(bytes[cursor]) {
            cursor += 1;
        }
        let start = cursor;

        match grammar {
            ValueGrammar::UntilComma => {
                let mut end = lower[start..]
                    .find(',')
                    .map(|offset| start + offset)
                    .unwrap_or(bytes.len());
                while end > start && is_blank(bytes[end - 1]) {
                    end -= 1;
                }
                if end > start {
                    return Some(start..end);
                }
            }
            ValueGrammar::Digits => {
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let bounded = bytes.get(end).is_none_or(|b| !is_word_byte(*b));
                if end > start && bounded {
                    return Some(start..end);
                }
            }
        }
    }
    None
}

fn first_line_reference(text: &str) -> Option<ModelReference<'_>> {
    let (offset, line) = lines_with_offsets(text).next()?;
    let value = line.trim();
    if value.is_empty() {
        return None;
    }
    let start = offset + (line.len() - line.trim_start().len());
    Some(ModelReference {
        path: value,
        span: start..start + value.len(),
        form: ReferenceForm::FirstLine,
    })
}

fn directive_reference(text: &str) -> Option<ModelReference<'_>> {
    lines_with_offsets(text).find_map(|(offset, line)| {
        let prefix_at = line.to_ascii_lowercase().find(DIRECTIVE_PREFIX)?;
        let range = find_assignment(
            line,
            prefix_at + DIRECTIVE_PREFIX.len(),
            MODEL_KEY,
            ValueGrammar::UntilComma,
        )?;
        Some(ModelReference {
            path: &line[range.clone()],
            span: offset + range.start..offset + range.end,
            form: ReferenceForm::Directive,
        })
    })
}

/// Locates the model reference, trying the first line before any `file/model=` command.
pub fn find_model_reference(text: &str) -> Option<ModelReference<'_>> {
    first_line_reference(text).or_else(|| directive_reference(text))
}

/// Last path component, accepting both `/` and `\` separators.
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Model path named by the control file, with `default_extension` added when the file
/// name has none.
pub fn resolve_model_reference(
    text: &str,
    default_extension: &str,
) -> Result<String, ControlFileError> {
    let reference = find_model_reference(text).ok_or(ControlFileError::NoModelReference)?;
    let name = base_name(reference.path);
    let has_extension = matches!(name.rfind('.'), Some(idx) if idx > 0);
    if has_extension {
        Ok(reference.path.to_string())
    } else {
        Ok(format!(
            "{}.{}",
            reference.path,
            default_extension.trim_start_matches('.')
        ))
    }
}

/// Replaces the model reference with its bare file name. Every other byte of `text`,
/// line endings included, is kept. Running it on its own output changes nothing.
pub fn strip_model_directory(text: &str) -> Result<String, ControlFileError> {
    let reference = find_model_reference(text).ok_or(ControlFileError::MalformedControlFile)?;
    let name = base_name(reference.path);
    if name.len() == reference.path.len() {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..reference.span.start]);
    out.push_str(name);
    out.push_str(&text[reference.span.end..]);
    Ok(out)
}

/// `nthreads = <n>` from a model file, or [`DEFAULT_THREAD_COUNT`].
pub fn thread_count(text: &str) -> u32 {
    lines_with_offsets(text)
        .find_map(|(_, line)| {
            let range = find_assignment(line, 0, THREADS_KEY, ValueGrammar::Digits)?;
            line[range].parse::<u32>().ok()
        })
        .unwrap_or(DEFAULT_THREAD_COUNT)
}
