// Key names accepted in `pre_key` / `post_key`. Any single character is also a key.
const NAMED: &[&str] = &[
    "enter", "return", "tab", "esc", "escape", "space", "backspace", "delete", "del",
    "up", "down", "left", "right", "home", "end", "pageup", "pagedown", "capslock",
    "ctrl", "control", "shift", "alt", "option", "cmd", "command", "win", "super", "meta",
    "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12",
];

pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Named keys lowercased; single characters keep their case.
pub fn canonical(name: &str) -> String {
    let t = name.trim();
    if t.chars().count() == 1 {
        t.to_string()
    } else {
        t.to_lowercase()
    }
}

pub fn is_known(name: &str) -> bool {
    let n = normalize(name);
    n.chars().count() == 1 || NAMED.contains(&n.as_str())
}
