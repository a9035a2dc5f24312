use std::collections::{BTreeMap, HashMap};

use cyder_tools::log::{error, info, warn};
use serde::{Deserialize, Serialize};

use super::{to_record, KeyValueStore, StoreError, StoreResult};

pub type PromptVariables = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: i64,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub variables: PromptVariables,
}

impl PromptRecord {
    /// Fills `{name}` placeholders from the stored variables, with `overrides`
    /// taking precedence. `{{` and `}}` produce literal braces; unknown
    /// placeholders are left untouched.
    pub fn render(&self, overrides: &PromptVariables) -> String {
        let lookup = |key: &str| overrides.get(key).or_else(|| self.variables.get(key));
        let mut rendered = String::with_capacity(self.content.len());
        let mut rest = self.content.as_str();

        while let Some(pos) = rest.find(['{', '}']) {
            rendered.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if tail.starts_with("{{") || tail.starts_with("}}") {
                rendered.push_str(&tail[..1]);
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with('}') {
                rendered.push('}');
                rest = &tail[1..];
                continue;
            }
            match tail.find('}') {
                Some(end) => {
                    let placeholder = &tail[1..end];
                    match lookup(placeholder) {
                        Some(value) => rendered.push_str(value),
                        None => rendered.push_str(&tail[..=end]),
                    }
                    rest = &tail[end + 1..];
                }
                None => {
                    rendered.push_str(tail);
                    rest = "";
                }
            }
        }
        rendered.push_str(rest);
        rendered
    }
}

#[derive(Serialize)]
struct NewPrompt<'a> {
    name: &'a str,
    content: &'a str,
    variables: &'a PromptVariables,
}

/// Prompt templates, unique by name.
#[derive(Clone)]
pub struct PromptStore {
    kv: KeyValueStore,
    key: String,
}

impl PromptStore {
    pub fn new(kv: KeyValueStore, key: impl Into<String>) -> Self {
        Self { kv, key: key.into() }
    }

    async fn load(&self) -> StoreResult<Vec<PromptRecord>> {
        self.kv.load(&self.key).await
    }

    async fn save(&self, prompts: &[PromptRecord]) -> StoreResult<()> {
        self.kv.save(&self.key, prompts).await
    }

    pub async fn insert(
        &self,
        name: &str,
        content: &str,
        variables: PromptVariables,
    ) -> StoreResult<PromptRecord> {
        let result = async {
            let prompts = self.load().await?;
            if prompts.iter().any(|p| p.name == name) {
                return Err(StoreError::PromptAlreadyExists(name.to_string()));
            }
            let new_prompt = NewPrompt {
                name,
                content,
                variables: &variables,
            };
            let id = self.kv.insert(&self.key, to_record(&new_prompt)?).await?;
            Ok::<_, StoreError>(PromptRecord {
                id,
                name: name.to_string(),
                content: content.to_string(),
                variables,
            })
        }
        .await;

        match &result {
            Ok(_) => info!("Prompt '{}' inserted successfully.", name),
            Err(e) => error!("Error inserting prompt: {}", e),
        }
        result
    }

    pub async fn select(&self, name: &str) -> StoreResult<PromptRecord> {
        let result = async {
            self.load()
                .await?
                .into_iter()
                .find(|p| p.name == name)
                .ok_or_else(|| StoreError::PromptNotFound(name.to_string()))
        }
        .await;

        if let Err(e) = &result {
            error!("Error selecting prompt: {}", e);
        }
        result
    }

    pub async fn select_all(&self) -> Vec<PromptRecord> {
        self.load().await.unwrap_or_else(|e| {
            error!("Error selecting all prompts: {}", e);
            Vec::new()
        })
    }

    pub async fn remove(&self, name: &str) -> StoreResult<()> {
        let result = async {
            let mut prompts = self.load().await?;
            let before = prompts.len();
            prompts.retain(|p| p.name != name);
            if prompts.len() == before {
                return Err(StoreError::PromptNotFound(name.to_string()));
            }
            self.save(&prompts).await
        }
        .await;

        match &result {
            Ok(()) => info!("Prompt '{}' removed successfully.", name),
            Err(e) => error!("Error removing prompt: {}", e),
        }
        result
    }

    /// Per-name removal status; the collection is written once at the end.
    pub async fn remove_many(&self, names: &[String]) -> HashMap<String, bool> {
        let result = async {
            let mut prompts = self.load().await?;
            let mut results = HashMap::with_capacity(names.len());
            for name in names {
                let before = prompts.len();
                prompts.retain(|p| &p.name != name);
                let removed = prompts.len() != before;
                if removed {
                    info!("Prompt '{}' removed successfully.", name);
                } else {
                    warn!("Prompt '{}' not found.", name);
                }
                results.entry(name.clone()).or_insert(removed);
            }
            self.save(&prompts).await?;
            Ok::<_, StoreError>(results)
        }
        .await;

        result.unwrap_or_else(|e| {
            error!("Error removing prompts: {}", e);
            names.iter().map(|name| (name.clone(), false)).collect()
        })
    }

    /// Replaces content and variables; id and name are preserved.
    pub async fn update(
        &self,
        name: &str,
        new_content: &str,
        new_variables: PromptVariables,
    ) -> StoreResult<PromptRecord> {
        let result = async {
            let mut prompts = self.load().await?;
            let prompt = prompts
                .iter_mut()
                .find(|p| p.name == name)
                .ok_or_else(|| StoreError::PromptNotFound(name.to_string()))?;
            prompt.content = new_content.to_string();
            prompt.variables = new_variables;
            let updated = prompt.clone();
            self.save(&prompts).await?;
            Ok::<_, StoreError>(updated)
        }
        .await;

        match &result {
            Ok(_) => info!("Prompt '{}' updated successfully.", name),
            Err(e) => error!("Error updating prompt: {}", e),
        }
        result
    }

    pub async fn rename(&self, old_name: &str, new_name: &str) -> StoreResult<()> {
        let result = async {
            let mut prompts = self.load().await?;
            if !prompts.iter().any(|p| p.name == old_name) {
                return Err(StoreError::PromptNotFound(old_name.to_string()));
            }
            if prompts.iter().any(|p| p.name == new_name) {
                return Err(StoreError::PromptAlreadyExists(new_name.to_string()));
            }
            if let Some(prompt) = prompts.iter_mut().find(|p| p.name == old_name) {
                prompt.name = new_name.to_string();
            }
            self.save(&prompts).await
        }
        .await;

        match &result {
            Ok(()) => info!("Prompt '{}' renamed to '{}'.", old_name, new_name),
            Err(e) => error!("Error renaming prompt: {}", e),
        }
        result
    }

    pub async fn render(&self, name: &str, overrides: &PromptVariables) -> StoreResult<String> {
        Ok(self.select(name).await?.render(overrides))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::memory_store;

    fn store() -> PromptStore {
        PromptStore::new(memory_store(), "prompts")
    }

    fn vars(pairs: &[(&str, &str)]) -> PromptVariables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_insert_then_select_round_trip() {
        let prompts = store();
        prompts.insert("P", "hi {x}", vars(&[("x", "1")])).await.unwrap();

        let prompt = prompts.select("P").await.unwrap();
        assert_eq!(prompt.content, "hi {x}");
        assert_eq!(prompt.variables, vars(&[("x", "1")]));
    }

    #[tokio::test]
    async fn test_insert_duplicate_name_fails() {
        let prompts = store();
        prompts.insert("P", "a", PromptVariables::new()).await.unwrap();
        let second = prompts.insert("P", "b", PromptVariables::new()).await;
        assert!(matches!(second, Err(StoreError::PromptAlreadyExists(name)) if name == "P"));
    }

    #[tokio::test]
    async fn test_select_missing_prompt() {
        let prompts = store();
        assert!(matches!(
            prompts.select("ghost").await,
            Err(StoreError::PromptNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_preserves_id_and_name() {
        let prompts = store();
        prompts.insert("A", "first", PromptVariables::new()).await.unwrap();
        prompts.insert("B", "second", PromptVariables::new()).await.unwrap();

        let updated = prompts
            .update("B", "changed {y}", vars(&[("y", "2")]))
            .await
            .unwrap();
        assert_eq!(updated.id, 2);
        assert_eq!(updated.name, "B");

        let stored = prompts.select("B").await.unwrap();
        assert_eq!(stored.content, "changed {y}");
        assert_eq!(stored.variables, vars(&[("y", "2")]));

        let missing = prompts.update("C", "x", PromptVariables::new()).await;
        assert!(matches!(missing, Err(StoreError::PromptNotFound(_))));
    }

    #[tokio::test]
    async fn test_rename_swap_restores_state() {
        let prompts = store();
        prompts.insert("A", "content", vars(&[("k", "v")])).await.unwrap();
        let original = prompts.select_all().await;

        for _ in 0..2 {
            prompts.rename("A", "B").await.unwrap();
            prompts.rename("B", "A").await.unwrap();
            assert_eq!(prompts.select_all().await, original);
        }
    }

    #[tokio::test]
    async fn test_rename_errors() {
        let prompts = store();
        prompts.insert("A", "a", PromptVariables::new()).await.unwrap();
        prompts.insert("B", "b", PromptVariables::new()).await.unwrap();

        assert!(matches!(
            prompts.rename("missing", "C").await,
            Err(StoreError::PromptNotFound(_))
        ));
        assert!(matches!(
            prompts.rename("A", "B").await,
            Err(StoreError::PromptAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_and_remove_many() {
        let prompts = store();
        for name in ["a", "b", "c"] {
            prompts.insert(name, "x", PromptVariables::new()).await.unwrap();
        }

        prompts.remove("a").await.unwrap();
        assert!(matches!(
            prompts.remove("a").await,
            Err(StoreError::PromptNotFound(_))
        ));

        let results = prompts
            .remove_many(&["b".to_string(), "zzz".to_string()])
            .await;
        assert_eq!(results["b"], true);
        assert_eq!(results["zzz"], false);

        let remaining: Vec<String> = prompts
            .select_all()
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(remaining, vec!["c"]);
    }

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let prompt = PromptRecord {
            id: 1,
            name: "forecast".to_string(),
            content: "Predict {periods} steps for {series}. Keep {unknown} and {{braces}}."
                .to_string(),
            variables: vars(&[("periods", "24"), ("series", "load")]),
        };

        let rendered = prompt.render(&vars(&[("series", "temperature")]));
        assert_eq!(
            rendered,
            "Predict 24 steps for temperature. Keep {unknown} and {braces}."
        );
    }

    #[test]
    fn test_render_handles_unterminated_placeholder() {
        let prompt = PromptRecord {
            id: 1,
            name: "p".to_string(),
            content: "open {brace".to_string(),
            variables: PromptVariables::new(),
        };
        assert_eq!(prompt.render(&PromptVariables::new()), "open {brace");
    }
}
