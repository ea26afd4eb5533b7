//! End-to-end tests for the compile, prepare and execute lifecycle.
//!
//! Everything runs against the mocked tools, so no network access is needed.

use std::collections::BTreeMap;
use std::sync::Arc;

use promptforge::collection::collection_from_directory;
use promptforge::executor::{ExecutorOptions, ExecutorTools, PipelineExecutor, TemplateStatus};
use promptforge::llm::{
    join_execution_tools, CachedExecutionTools, FileSystemStorage, MockedEchoTools, MockedEmbeddingTools,
    SharedExecutionTools,
};
use promptforge::pipeline::{compile_pipeline, pipeline_from_json, pipeline_to_json, Persona};
use promptforge::preparation::{is_pipeline_prepared, prepare_pipeline, HttpFetcher, PrepareOptions};
use promptforge::PipelineExecutionError;

const ASSISTANT: &str = r#"# Assistant

Answers questions from what it knows about Freedonia.

- URL https://books.example/assistant.book.md
- KNOWLEDGE The capital of Freedonia is Fredville.
- PERSONA Ada, a precise engineer
- INPUT PARAMETER {question} What to answer
- OUTPUT PARAMETER {answer} The answer

## Answer

- PERSONA Ada

```
{knowledge}

{question}
```

-> {answer}
"#;

fn mocked_tools() -> SharedExecutionTools {
    join_execution_tools(vec![
        Arc::new(MockedEchoTools::new()),
        Arc::new(MockedEmbeddingTools::new()),
    ])
}

fn inputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[tokio::test]
async fn test_compile_prepare_execute() {
    let pipeline = compile_pipeline(ASSISTANT).expect("book should compile");
    assert_eq!(pipeline.title, "Assistant");
    assert!(!is_pipeline_prepared(&pipeline));

    // The compiled form survives a JSON round trip before preparation.
    let pipeline = pipeline_from_json(&pipeline_to_json(&pipeline).unwrap()).unwrap();

    let tools = mocked_tools();
    let prepared = prepare_pipeline(
        &pipeline,
        tools.as_ref(),
        &HttpFetcher::default(),
        &PrepareOptions::default(),
    )
    .await
    .expect("preparation should succeed");
    assert!(is_pipeline_prepared(&prepared));
    assert!(matches!(prepared.personas[0], Persona::Prepared(_)));
    assert_eq!(prepared.knowledge_pieces.len(), 1);

    let executor = PipelineExecutor::new(prepared, ExecutorTools::new(tools), ExecutorOptions::default()).unwrap();
    let report = executor
        .execute(&inputs(&[("question", "What is the capital?")]))
        .await
        .unwrap();

    assert!(report.is_successful(), "report: {:?}", report.templates);
    let answer = &report.outputs["answer"];
    assert!(answer.contains("Fredville"), "answer was {answer}");
    assert!(answer.contains("What is the capital?"));
    assert_eq!(report.executions.len(), 1);
    assert!(report.usage.output.words > 0);
}

const BRANCHING: &str = r#"# Branching

- INPUT PARAMETER {topic}
- OUTPUT PARAMETER {title}
- OUTPUT PARAMETER {summary}

## Draft

- EXPECT min 20 words

```
{topic}
```

-> {draft}

## Summary

```
Summarize: {draft}
```

-> {summary}

## Title

```
Title for {topic}
```

-> {title}
"#;

#[tokio::test]
async fn test_failed_template_skips_only_its_dependents() {
    let pipeline = compile_pipeline(BRANCHING).unwrap();
    let executor = PipelineExecutor::new(
        pipeline,
        ExecutorTools::new(mocked_tools()),
        ExecutorOptions::default().with_max_execution_attempts(2),
    )
    .unwrap();

    let report = executor.execute(&inputs(&[("topic", "rust")])).await.unwrap();
    assert!(!report.is_successful());
    assert!(!report.is_aborted);

    let draft = report.template("draft").unwrap();
    assert_eq!(draft.status, TemplateStatus::Failed);
    assert_eq!(draft.attempts, 2);
    assert_eq!(report.template("summary").unwrap().status, TemplateStatus::Skipped);
    assert_eq!(report.template("title").unwrap().status, TemplateStatus::Succeeded);
    assert_eq!(report.outputs.get("title").map(String::as_str), Some("Title for rust"));

    let err = executor.execute_or_fail(&inputs(&[("topic", "rust")])).await.unwrap_err();
    match err {
        PipelineExecutionError::TemplateFailed { template, attempts, .. } => {
            assert_eq!(template, "draft");
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_filesystem_cache_survives_executors() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = compile_pipeline(BRANCHING.replace("- EXPECT min 20 words\n\n", "").as_str()).unwrap();

    let run = |pipeline| {
        let storage = Arc::new(FileSystemStorage::new(dir.path()));
        let cached = Arc::new(CachedExecutionTools::new(Arc::new(MockedEchoTools::new()), storage));
        let executor =
            PipelineExecutor::new(pipeline, ExecutorTools::new(cached.clone()), ExecutorOptions::default()).unwrap();
        (executor, cached)
    };

    let (first, first_cache) = run(pipeline.clone());
    let first_outputs = first.execute_or_fail(&inputs(&[("topic", "rust")])).await.unwrap();
    assert_eq!(first_cache.stats().misses, 3);
    assert_eq!(first_cache.stats().hits, 0);

    let (second, second_cache) = run(pipeline);
    let second_outputs = second.execute_or_fail(&inputs(&[("topic", "rust")])).await.unwrap();
    assert_eq!(second_cache.stats().hits, 3);
    assert_eq!(second_cache.stats().misses, 0);
    assert_eq!(first_outputs, second_outputs);
}

#[tokio::test]
async fn test_joker_pipeline_from_directory_collection() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("greeting.book.md"),
        "# Greeting\n\n- URL https://books.example/greeting.book.md\n- INPUT PARAMETER {name}\n- OUTPUT PARAMETER {greeting}\n\n## Greet\n\n- SIMPLE TEMPLATE\n\n```\nHello {name}\n```\n\n-> {greeting}\n",
    )
    .unwrap();
    let collection = collection_from_directory(dir.path()).await.unwrap();

    let caller = compile_pipeline(
        "# Caller\n\n- INPUT PARAMETER {name}\n- OUTPUT PARAMETER {greeting}\n\n## Greeting\n\n- JOKER https://books.example/greeting.book.md\n\n```\nunused {name}\n```\n\n-> {greeting}\n",
    )
    .unwrap();
    let tools = ExecutorTools::new(mocked_tools()).with_collection(Arc::new(collection));
    let executor = PipelineExecutor::new(caller, tools, ExecutorOptions::default()).unwrap();

    let outputs = executor.execute_or_fail(&inputs(&[("name", "Ada")])).await.unwrap();
    assert_eq!(outputs["greeting"], "Hello Ada");
}
