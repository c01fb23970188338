//! Minimal GLSL preprocessor.
//!
//! Evaluates `#define` / `#ifdef` / `#ifndef` / `#else` / `#endif` so the
//! declaration scans only see the active branch. Macro bodies participate
//! in conditional evaluation only; no token substitution is performed.
//! `#version`, `#extension` and `precision` lines are dropped — the
//! translator emits its own header.

use fxhash::FxHashMap;
use lazy_static::lazy_static;
use regex::Regex;
use smallvec::SmallVec;

lazy_static! {
    static ref RE_DIRECTIVE: Regex =
        Regex::new(r"^\s*#\s*(?P<dir>\w+)\s*(?P<rest>.*?)\s*$").unwrap();
    static ref RE_NAME: Regex = Regex::new(r"^(?P<name>[A-Za-z_]\w*)\s*(?P<value>.*)$").unwrap();
}

struct Branch {
    parent_active: bool,
    taken: bool,
    active: bool,
}

pub struct Preprocessor {
    defines: FxHashMap<String, String>,
    stack: SmallVec<[Branch; 16]>,
}

/// What to do with one input line.
#[derive(Debug, Eq, PartialEq)]
pub enum LineAction {
    /// Plain line on an active branch: keep it.
    Emit,
    /// Directive (consumed) or line on an inactive branch.
    Skip,
}

impl Preprocessor {
    pub fn new() -> Preprocessor {
        Preprocessor {
            defines: FxHashMap::default(),
            stack: SmallVec::new(),
        }
    }

    pub fn define(&mut self, name: &str, value: &str) {
        self.defines.insert(name.to_string(), value.to_string());
    }

    fn active(&self) -> bool {
        self.stack.last().map_or(true, |b| b.active)
    }

    pub fn line(&mut self, line: &str) -> LineAction {
        let caps = match RE_DIRECTIVE.captures(line) {
            Some(c) => c,
            None => {
                return if self.active() {
                    LineAction::Emit
                } else {
                    LineAction::Skip
                };
            }
        };

        let rest = caps.name("rest").map_or("", |m| m.as_str());
        match &caps["dir"] {
            "define" => {
                if self.active() {
                    if let Some(c) = RE_NAME.captures(rest) {
                        self.define(&c["name"], c["value"].trim());
                    } else {
                        warn!("malformed #define: {}", line.trim());
                    }
                }
            }
            "undef" => {
                if self.active() {
                    if let Some(c) = RE_NAME.captures(rest) {
                        self.defines.remove(&c["name"]);
                    }
                }
            }
            "ifdef" | "ifndef" => {
                let parent = self.active();
                let defined = RE_NAME
                    .captures(rest)
                    .map_or(false, |c| self.defines.contains_key(&c["name"]));
                let cond = if &caps["dir"] == "ifdef" {
                    defined
                } else {
                    !defined
                };
                let active = parent && cond;
                self.stack.push(Branch {
                    parent_active: parent,
                    taken: active,
                    active,
                });
            }
            "if" => {
                // expression conditionals are out of scope: treat as taken
                warn!("#if expression not evaluated, branch treated as active");
                let parent = self.active();
                self.stack.push(Branch {
                    parent_active: parent,
                    taken: parent,
                    active: parent,
                });
            }
            "else" | "elif" => {
                if let Some(top) = self.stack.last_mut() {
                    top.active = top.parent_active && !top.taken;
                    top.taken = top.taken || top.active;
                } else {
                    warn!("#{} without matching #if", &caps["dir"]);
                }
            }
            "endif" => {
                if self.stack.pop().is_none() {
                    warn!("#endif without matching #if");
                }
            }
            // header directives are re-synthesized by the translator
            "version" | "extension" | "pragma" | "line" => {}
            other => {
                if self.active() {
                    warn!("unknown preprocessor directive #{}", other);
                }
            }
        }
        LineAction::Skip
    }
}
