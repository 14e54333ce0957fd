//! Small formatting and naming helpers shared by the builder and the dialect backends.

use std::collections::HashSet;

/// Format a float literal. Always keeps a decimal point so the literal stays float-typed.
pub fn fmt_float(v: f64) -> String {
    if !v.is_finite() {
        return "0.0".to_string();
    }
    let s = format!("{v}");
    if s.contains('.') || s.contains('e') || s.contains("inf") {
        s
    } else {
        format!("{s}.0")
    }
}

/// Sanitize a string into a valid identifier for both GLSL and WGSL.
pub fn sanitize_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 1);
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    // Both languages reserve the `__` prefix.
    while out.starts_with("__") {
        out.remove(0);
    }
    out
}

/// `objectUniforms` style instance name for a group.
pub fn lower_camel(s: &str) -> String {
    let ident = sanitize_ident(s);
    let mut out = String::with_capacity(ident.len());
    let mut upper_next = false;
    for (i, ch) in ident.chars().enumerate() {
        if ch == '_' && i > 0 {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else if i == 0 {
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// `ObjectUniforms` style type name for a group.
pub fn upper_camel(s: &str) -> String {
    let lower = lower_camel(s);
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Indent every non-empty line by `levels` four-space steps.
pub fn indent_lines(lines: &[String], levels: usize) -> Vec<String> {
    let indent = "    ".repeat(levels);
    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect()
}

/// Re-indent a block of source text (used for native function bodies).
pub fn indent_source(source: &str, levels: usize) -> String {
    let lines: Vec<String> = source
        .replace("\r\n", "\n")
        .lines()
        .map(|l| l.trim_end().to_string())
        .collect();
    indent_lines(&lines, levels).join("\n")
}

/// Hands out identifiers that are unique within one namespace.
///
/// Collisions get a numeric suffix (`color`, `color_1`, `color_2`, ...).
#[derive(Clone, Debug, Default)]
pub struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new<'a>(reserved: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            used: reserved.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    pub fn release(&mut self, name: &str) {
        self.used.remove(name);
    }

    /// Claim `preferred` (sanitized), suffixing it until it is free in `self` and `outer`.
    pub fn claim(&mut self, preferred: &str, outer: Option<&NameAllocator>) -> String {
        let base = sanitize_ident(preferred);
        let taken = |n: &str, me: &NameAllocator| {
            me.used.contains(n) || outer.is_some_and(|o| o.used.contains(n))
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while taken(&candidate, self) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }

    /// Next free `{prefix}{N}` name.
    pub fn claim_numbered(&mut self, prefix: &str, counter: &mut u32, outer: Option<&NameAllocator>) -> String {
        loop {
            let candidate = format!("{prefix}{counter}");
            *counter += 1;
            if !self.used.contains(&candidate) && !outer.is_some_and(|o| o.used.contains(&candidate)) {
                self.used.insert(candidate.clone());
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_float_keeps_decimal_point() {
        assert_eq!(fmt_float(1.0), "1.0");
        assert_eq!(fmt_float(0.5), "0.5");
        assert_eq!(fmt_float(-2.0), "-2.0");
        assert_eq!(fmt_float(f64::NAN), "0.0");
    }

    #[test]
    fn test_sanitize_ident() {
        assert_eq!(sanitize_ident("my-node.1"), "my_node_1");
        assert_eq!(sanitize_ident("3d"), "_3d");
        assert_eq!(sanitize_ident("__x"), "_x");
        assert_eq!(sanitize_ident(""), "_");
    }

    #[test]
    fn test_group_names() {
        assert_eq!(lower_camel("object"), "object");
        assert_eq!(upper_camel("object"), "Object");
        assert_eq!(upper_camel("per_frame"), "PerFrame");
        assert_eq!(lower_camel("Render"), "render");
    }

    #[test]
    fn test_name_allocator_suffixes_collisions() {
        let outer = NameAllocator::new(["time"]);
        let mut names = NameAllocator::new(["main"]);
        assert_eq!(names.claim("color", Some(&outer)), "color");
        assert_eq!(names.claim("color", Some(&outer)), "color_1");
        assert_eq!(names.claim("time", Some(&outer)), "time_1");
        assert_eq!(names.claim("main", None), "main_1");
        let mut counter = 0;
        names.reserve("nodeVar0");
        assert_eq!(names.claim_numbered("nodeVar", &mut counter, None), "nodeVar1");
        names.release("color");
        assert_eq!(names.claim("color", Some(&outer)), "color");
    }
}
