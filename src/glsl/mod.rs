//! GLSL-ES → desktop GLSL translation.
//!
//! Shader sources arrive as WebGL 1 GLSL-ES; the backend wants `#version
//! 330` with `in`/`out` interface variables and a declared fragment
//! output. Translation happens line-by-line: the preprocessor resolves
//! conditionals, declaration lines are harvested into uniform / sampler /
//! attribute tables, and the remaining body text is rewritten with
//! whole-word substitutions. The uniform tables feed the std140 layout at
//! program link.

mod layout;
mod preprocessor;

pub use self::layout::{align_up, layout_block, MemberLayout, UniformType};
pub use self::preprocessor::{LineAction, Preprocessor};

use lazy_static::lazy_static;
use regex::Regex;
use smallvec::SmallVec;

use crate::backend::SamplerKind;
use crate::error::{Error, Result};

pub const MAX_SOURCE: usize = 64 * 1024;
pub const MAX_TRANSLATED: usize = 68 * 1024;
pub const MAX_LINE: usize = 1024;
pub const MAX_UNIFORMS: usize = 128;
pub const MAX_SAMPLERS: usize = 12;
pub const MAX_ATTRIBUTES: usize = 16;
pub const MAX_UNIFORM_NAME: usize = 64;
pub const MAX_UNIFORM_ARRAY: u32 = 64;

/// Name substituted for `gl_FragColor` when the source has no output
/// declaration of its own.
pub const FRAG_COLOR_NAME: &str = "frag_color";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    Vertex,
    Fragment,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UniformDecl {
    pub name: String,
    pub ty: UniformType,
    /// 0 = declared without brackets.
    pub array_count: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SamplerDecl {
    pub name: String,
    pub kind: SamplerKind,
}

#[derive(Clone, Debug)]
pub struct Translation {
    pub source: String,
    /// Every block uniform declared in the active source, declaration order.
    pub declared: Vec<UniformDecl>,
    /// The uniforms actually emitted into the header (the declared set, or
    /// the usage-filtered override), declaration order of the emit set.
    pub emitted: Vec<UniformDecl>,
    pub samplers: Vec<SamplerDecl>,
    /// Vertex-stage attributes in declaration order; the position in this
    /// list is the attribute index.
    pub attributes: Vec<String>,
}

lazy_static! {
    static ref RE_UNIFORM: Regex = Regex::new(
        r"^\s*uniform\s+(?:(?:lowp|mediump|highp)\s+)?(?P<ty>[A-Za-z_]\w*)\s+(?P<name>[A-Za-z_]\w*)\s*(?:\[\s*(?P<count>\d+)\s*\])?\s*;\s*(?://.*)?$"
    )
    .unwrap();
    static ref RE_ATTRIBUTE: Regex = Regex::new(
        r"^\s*(?:attribute|in)\s+(?:(?:lowp|mediump|highp)\s+)?(?P<ty>[A-Za-z_]\w*)\s+(?P<name>[A-Za-z_]\w*)\s*;\s*(?://.*)?$"
    )
    .unwrap();
    static ref RE_PRECISION: Regex = Regex::new(r"^\s*precision\s+").unwrap();
    static ref RE_OUT_DECL: Regex =
        Regex::new(r"^\s*out\s+(?:(?:lowp|mediump|highp)\s+)?vec4\s+").unwrap();
}

fn is_word_byte(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphanumeric()
}

/// Whole-word replacement; returns the rewritten line and how many
/// occurrences were substituted.
pub fn replace_word(line: &str, from: &str, to: &str) -> (String, usize) {
    let bytes = line.as_bytes();
    let flen = from.len();
    let mut out = String::with_capacity(line.len());
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(from.as_bytes()) {
            let left_ok = i == 0 || !is_word_byte(bytes[i - 1]);
            let right_ok = i + flen >= bytes.len() || !is_word_byte(bytes[i + flen]);
            if left_ok && right_ok {
                out.push_str(to);
                count += 1;
                i += flen;
                continue;
            }
        }
        // source is ASCII in practice, but stay utf-8 correct
        let ch = line[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    (out, count)
}

pub fn contains_word(text: &str, word: &str) -> bool {
    let bytes = text.as_bytes();
    let wlen = word.len();
    let mut i = 0;
    while let Some(pos) = text[i..].find(word) {
        let at = i + pos;
        let left_ok = at == 0 || !is_word_byte(bytes[at - 1]);
        let right_ok = at + wlen >= bytes.len() || !is_word_byte(bytes[at + wlen]);
        if left_ok && right_ok {
            return true;
        }
        i = at + wlen;
    }
    false
}

fn classify_uniform(
    ty: &str,
    name: &str,
    count: Option<u32>,
    uniforms: &mut Vec<UniformDecl>,
    samplers: &mut Vec<SamplerDecl>,
) -> Result<bool> {
    if name.len() > MAX_UNIFORM_NAME {
        return Err(Error::UniformNameTooLong);
    }

    let sampler_kind = match ty {
        "sampler2D" => Some(SamplerKind::Tex2d),
        "samplerCube" => Some(SamplerKind::Cube),
        _ => None,
    };
    if let Some(kind) = sampler_kind {
        if count.is_some() {
            return Err(Error::UnsupportedArrayType(ty.to_string()));
        }
        if samplers.iter().any(|s| s.name == name) {
            return Ok(true);
        }
        if samplers.len() == MAX_SAMPLERS {
            return Err(Error::TooManySamplers);
        }
        samplers.push(SamplerDecl {
            name: name.to_string(),
            kind,
        });
        return Ok(true);
    }

    let ty = match UniformType::parse(ty) {
        Some(t) => t,
        // unknown type (struct, bool, ...): leave the line alone
        None => return Ok(false),
    };
    if let Some(n) = count {
        if !ty.array_capable() {
            return Err(Error::UnsupportedArrayType(ty.glsl_name().to_string()));
        }
        if n == 0 || n > MAX_UNIFORM_ARRAY {
            return Err(Error::UniformArrayTooLarge(name.to_string()));
        }
    }
    if uniforms.iter().any(|u| u.name == name) {
        return Ok(true);
    }
    if uniforms.len() == MAX_UNIFORMS {
        return Err(Error::TooManyUniforms);
    }
    uniforms.push(UniformDecl {
        name: name.to_string(),
        ty,
        array_count: count.unwrap_or(0),
    });
    Ok(true)
}

/// Translates one stage's source.
///
/// With `emit_override` absent (the link-time discovery pass) the header
/// re-declares every uniform found in the source. With an override (the
/// link-time union pass) the header declares exactly the override uniforms
/// whose names appear as word-boundary tokens in this stage's active body,
/// so drivers never see a uniform a stage does not use.
pub fn translate(
    source: &str,
    stage: Stage,
    emit_override: Option<&[UniformDecl]>,
) -> Result<Translation> {
    if source.len() > MAX_SOURCE {
        return Err(Error::TooLarge("shader source"));
    }

    let mut pp = Preprocessor::new();
    let mut uniforms: Vec<UniformDecl> = Vec::new();
    let mut samplers: Vec<SamplerDecl> = Vec::new();
    let mut attributes: Vec<String> = Vec::new();
    let mut body: Vec<String> = Vec::new();
    let mut frag_color_uses = 0usize;
    let mut has_user_output = false;

    for line in source.lines() {
        if line.len() > MAX_LINE {
            return Err(Error::LineTooLong);
        }
        if pp.line(line) == LineAction::Skip {
            continue;
        }
        if RE_PRECISION.is_match(line) {
            continue;
        }

        if let Some(c) = RE_UNIFORM.captures(line) {
            // an unparseable count is far past any accepted size
            let count = c
                .name("count")
                .map(|m| m.as_str().parse::<u32>().unwrap_or(u32::max_value()));
            if classify_uniform(&c["ty"], &c["name"], count, &mut uniforms, &mut samplers)? {
                continue;
            }
        }

        if stage == Stage::Vertex {
            if let Some(c) = RE_ATTRIBUTE.captures(line) {
                let name = &c["name"];
                if !attributes.iter().any(|a| a == name) {
                    if attributes.len() == MAX_ATTRIBUTES {
                        return Err(Error::TooLarge("attribute table"));
                    }
                    attributes.push(name.to_string());
                }
                let (rewritten, _) = replace_word(line, "attribute", "in");
                body.push(rewritten);
                continue;
            }
        } else if RE_OUT_DECL.is_match(line) {
            has_user_output = true;
        }

        let mut rewritten = line.to_string();
        match stage {
            Stage::Vertex => {
                rewritten = replace_word(&rewritten, "attribute", "in").0;
                rewritten = replace_word(&rewritten, "varying", "out").0;
            }
            Stage::Fragment => {
                rewritten = replace_word(&rewritten, "varying", "in").0;
                let (r, n) = replace_word(&rewritten, "gl_FragColor", FRAG_COLOR_NAME);
                rewritten = r;
                frag_color_uses += n;
            }
        }
        rewritten = replace_word(&rewritten, "texture2D", "texture").0;
        rewritten = replace_word(&rewritten, "textureCube", "texture").0;
        body.push(rewritten);
    }

    let body_text = body.join("\n");

    // pick the emit set
    let emitted: Vec<UniformDecl> = match emit_override {
        Some(union) => union
            .iter()
            .filter(|u| contains_word(&body_text, &u.name))
            .cloned()
            .collect(),
        None => uniforms.clone(),
    };

    // header
    let mut out = String::with_capacity(body_text.len() + 256);
    out.push_str("#version 330\n");
    if stage == Stage::Fragment && frag_color_uses > 0 && !has_user_output {
        out.push_str("out vec4 ");
        out.push_str(FRAG_COLOR_NAME);
        out.push_str(";\n");
    }
    for u in &emitted {
        out.push_str("uniform ");
        out.push_str(u.ty.glsl_name());
        out.push(' ');
        out.push_str(&u.name);
        if u.array_count > 0 {
            out.push_str(&format!("[{}]", u.array_count));
        }
        out.push_str(";\n");
    }
    for s in &samplers {
        match s.kind {
            SamplerKind::Tex2d => out.push_str("uniform sampler2D "),
            SamplerKind::Cube => out.push_str("uniform samplerCube "),
        }
        out.push_str(&s.name);
        out.push_str(";\n");
    }
    out.push_str(&body_text);
    out.push('\n');

    if out.len() > MAX_TRANSLATED {
        return Err(Error::TooLarge("translated shader source"));
    }

    Ok(Translation {
        source: out,
        declared: uniforms,
        emitted,
        samplers,
        attributes,
    })
}

/// Builds the cross-stage uniform union: names declared in either stage,
/// vertex-stage order first. A name declared in both stages with
/// different types cannot link; the message goes to the program info-log.
pub fn merge_uniforms(
    vs: &[UniformDecl],
    fs: &[UniformDecl],
) -> std::result::Result<Vec<UniformDecl>, String> {
    let mut union: SmallVec<[UniformDecl; 16]> = SmallVec::new();
    for u in vs.iter().chain(fs.iter()) {
        match union.iter().find(|m| m.name == u.name) {
            Some(existing) => {
                if existing.ty != u.ty || existing.array_count != u.array_count {
                    return Err(format!("uniform {} declared with conflicting types", u.name));
                }
            }
            None => union.push(u.clone()),
        }
    }
    if union.len() > MAX_UNIFORMS {
        return Err("uniform uniforms rejected".to_string());
    }
    Ok(union.into_vec())
}
