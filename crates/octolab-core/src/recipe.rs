//! The `Recipe` entity. Read-only from the core's perspective: recipe
//! generation and curation are out of scope here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub display_name: String,
    pub target_software: String,
    pub version_constraint: String,
    pub exploit_family: String,
    /// Opaque blueprint: images, ports, and the in-VM compose project.
    pub blueprint: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_roundtrip() {
        let recipe = Recipe {
            id: Uuid::new_v4(),
            display_name: "Log4Shell".into(),
            target_software: "log4j".into(),
            version_constraint: "<2.15.0".into(),
            exploit_family: "rce".into(),
            blueprint: serde_json::json!({"images": ["octolab/log4shell-target"]}),
        };
        let json = serde_json::to_string(&recipe).unwrap();
        let back: Recipe = serde_json::from_str(&json).unwrap();
        assert_eq!(back.display_name, recipe.display_name);
    }
}
