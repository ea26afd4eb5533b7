//! Persona preparation: binding a persona to a concrete chat model.

use crate::error::KnowledgeError;
use crate::llm::{ExecutionTools, ModelRequirements, ModelVariant};
use crate::pipeline::{PersonaDefinition, PreparedPersona};

/// Pick the first chat model the tools offer and bake the persona into its system message.
pub async fn prepare_persona(
    persona: &PersonaDefinition,
    tools: &dyn ExecutionTools,
    preparation_id: &str,
) -> Result<PreparedPersona, KnowledgeError> {
    let models = tools.list_models().await.map_err(|e| {
        tracing::warn!(persona = %persona.name, error = %e, "Could not list models for persona");
        KnowledgeError::NoChatModel(persona.name.clone())
    })?;

    let model = models
        .into_iter()
        .find(|model| model.model_variant == ModelVariant::Chat)
        .ok_or_else(|| KnowledgeError::NoChatModel(persona.name.clone()))?;

    let mut prepared = PreparedPersona {
        name: persona.name.clone(),
        description: persona.description.clone(),
        model_requirements: ModelRequirements::new(ModelVariant::Chat).with_model_name(model.model_name),
        preparation_ids: vec![preparation_id.to_string()],
    };
    prepared.model_requirements.system_message = Some(prepared.system_message());

    tracing::info!(
        persona = %prepared.name,
        model = prepared.model_requirements.model_name.as_deref().unwrap_or_default(),
        "Persona prepared"
    );
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockedEchoTools, MockedEmbeddingTools};

    fn ada() -> PersonaDefinition {
        PersonaDefinition {
            name: "Ada".into(),
            description: "a precise engineer".into(),
        }
    }

    #[tokio::test]
    async fn test_persona_gets_first_chat_model() {
        let prepared = prepare_persona(&ada(), &MockedEchoTools::new(), "prep").await.unwrap();
        assert_eq!(prepared.model_requirements.model_variant, ModelVariant::Chat);
        assert_eq!(prepared.model_requirements.model_name.as_deref(), Some("mocked-echo"));
        assert_eq!(
            prepared.model_requirements.system_message.as_deref(),
            Some("You are Ada, a precise engineer")
        );
        assert_eq!(prepared.preparation_ids, vec!["prep".to_string()]);
    }

    #[tokio::test]
    async fn test_no_chat_model() {
        let err = prepare_persona(&ada(), &MockedEmbeddingTools::new(), "prep").await.unwrap_err();
        assert!(matches!(err, KnowledgeError::NoChatModel(name) if name == "Ada"));
    }
}
