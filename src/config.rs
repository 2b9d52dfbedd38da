//! Bubble config: the flat parameter surface, validation, and merge rules.
//!
//! User code talks in flat knobs (`bubble_bg_color`, `header_text_color`,
//! `collapsible`, ...). The builder folds those into the nested wire shape,
//! grouping colors under `colors.bubble.*` / `colors.header.*`, and drops
//! every knob left at the `"auto"` sentinel. Stored configs merge patches
//! with a two-level deep merge on `colors`; everything else replaces.

use serde_json::{Map, Value};

use crate::error::RuntimeError;

/// Sentinel meaning "leave this color alone".
pub const COLOR_AUTO: &str = "auto";

const FORBIDDEN_EXTRA_KEYS: [&str; 3] = ["id", "config", "colors"];

/// Flat config patch builder used both when creating a bubble and when
/// updating one via [`Bubble::config`](crate::Bubble::config).
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    role: Option<String>,
    kind: Option<String>,
    name: Option<Value>,
    icon: Option<Value>,
    collapsible: Option<bool>,
    collapsible_by_default: Option<bool>,
    collapsible_title: Option<Value>,
    collapsible_max_height: Option<Value>,
    bubble_colors: Map<String, Value>,
    header_colors: Map<String, Value>,
    extra: Option<Map<String, Value>>,
}

fn set_color(group: &mut Map<String, Value>, key: &str, value: impl Into<String>) {
    let value = value.into();
    if value != COLOR_AUTO {
        group.insert(key.to_string(), Value::String(value));
    }
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Bubble type on the wire (`type`); free-form, defaults to `"text"`.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Value::String(name.into()));
        self
    }

    /// Sends `name: null`, which hides the display name.
    pub fn clear_name(mut self) -> Self {
        self.name = Some(Value::Null);
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(Value::String(icon.into()));
        self
    }

    pub fn clear_icon(mut self) -> Self {
        self.icon = Some(Value::Null);
        self
    }

    pub fn collapsible(mut self, collapsible: bool) -> Self {
        self.collapsible = Some(collapsible);
        self
    }

    pub fn collapsible_by_default(mut self, by_default: bool) -> Self {
        self.collapsible_by_default = Some(by_default);
        self
    }

    pub fn collapsible_title(mut self, title: impl Into<String>) -> Self {
        self.collapsible_title = Some(Value::String(title.into()));
        self
    }

    /// Accepts a number or a CSS size string.
    pub fn collapsible_max_height(mut self, max_height: impl Into<Value>) -> Self {
        self.collapsible_max_height = Some(max_height.into());
        self
    }

    pub fn bubble_bg_color(mut self, color: impl Into<String>) -> Self {
        set_color(&mut self.bubble_colors, "bg", color);
        self
    }

    pub fn bubble_text_color(mut self, color: impl Into<String>) -> Self {
        set_color(&mut self.bubble_colors, "text", color);
        self
    }

    pub fn bubble_border_color(mut self, color: impl Into<String>) -> Self {
        set_color(&mut self.bubble_colors, "border", color);
        self
    }

    pub fn header_bg_color(mut self, color: impl Into<String>) -> Self {
        set_color(&mut self.header_colors, "bg", color);
        self
    }

    pub fn header_text_color(mut self, color: impl Into<String>) -> Self {
        set_color(&mut self.header_colors, "text", color);
        self
    }

    pub fn header_border_color(mut self, color: impl Into<String>) -> Self {
        set_color(&mut self.header_colors, "border", color);
        self
    }

    pub fn header_icon_bg_color(mut self, color: impl Into<String>) -> Self {
        set_color(&mut self.header_colors, "iconBg", color);
        self
    }

    pub fn header_icon_text_color(mut self, color: impl Into<String>) -> Self {
        set_color(&mut self.header_colors, "iconText", color);
        self
    }

    /// Arbitrary fields forwarded into the config top level. `id`, `config`,
    /// and `colors` are rejected at normalize time.
    pub fn extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Folds the flat knobs into a nested patch, validating `extra`.
    /// `source` names the calling surface in error messages.
    pub(crate) fn normalize(self, source: &str) -> Result<NormalizedPatch, RuntimeError> {
        let mut entries = Map::new();

        if let Some(name) = self.name {
            entries.insert("name".to_string(), name);
        }
        if let Some(icon) = self.icon {
            entries.insert("icon".to_string(), icon);
        }

        if let Some(collapsible) = self.collapsible {
            entries.insert("collapsible".to_string(), Value::Bool(collapsible));
        }
        // collapsible bubbles start collapsed unless the caller says otherwise
        let by_default = self
            .collapsible_by_default
            .or(if self.collapsible == Some(true) { Some(true) } else { None });
        if let Some(by_default) = by_default {
            entries.insert("collapsible_by_default".to_string(), Value::Bool(by_default));
        }
        if let Some(title) = self.collapsible_title {
            entries.insert("collapsible_title".to_string(), title);
        }
        if let Some(max_height) = self.collapsible_max_height {
            entries.insert("collapsible_max_height".to_string(), max_height);
        }

        let mut colors = Map::new();
        if !self.bubble_colors.is_empty() {
            colors.insert("bubble".to_string(), Value::Object(self.bubble_colors));
        }
        if !self.header_colors.is_empty() {
            colors.insert("header".to_string(), Value::Object(self.header_colors));
        }
        if !colors.is_empty() {
            entries.insert("colors".to_string(), Value::Object(colors));
        }

        if let Some(extra) = self.extra {
            for key in FORBIDDEN_EXTRA_KEYS {
                if extra.contains_key(key) {
                    return Err(RuntimeError::InvalidConfig(format!(
                        "{source} does not accept `{key}` in extra"
                    )));
                }
            }
            entries.extend(extra);
        }

        Ok(NormalizedPatch {
            role: self.role,
            kind: self.kind,
            entries,
        })
    }
}

/// A validated patch: role/type changes split out from the config entries.
#[derive(Debug, Clone, Default)]
pub(crate) struct NormalizedPatch {
    pub role: Option<String>,
    pub kind: Option<String>,
    pub entries: Map<String, Value>,
}

/// Applies `patch` to `config`. Top-level keys replace, except `colors`,
/// which merges: per color group, map-into-map shallow-merges (patch wins),
/// anything else replaces.
pub(crate) fn merge_config(config: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        if key == "colors" {
            if let (Some(Value::Object(current)), Value::Object(incoming)) =
                (config.get_mut(key), value)
            {
                merge_color_groups(current, incoming);
                continue;
            }
        }
        config.insert(key.clone(), value.clone());
    }
}

fn merge_color_groups(current: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (group, value) in incoming {
        if let (Some(Value::Object(have)), Value::Object(patch)) = (current.get_mut(group), value) {
            for (key, color) in patch {
                have.insert(key.clone(), color.clone());
            }
        } else {
            current.insert(group.clone(), value.clone());
        }
    }
}
