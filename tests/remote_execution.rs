//! Pipelines executed through a remote server over a loopback TCP socket.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use promptforge::executor::{ExecutorOptions, ExecutorTools, PipelineExecutor};
use promptforge::llm::{
    ExecutionTools, ExecutionToolsRegistry, MockedEchoTools, RemoteExecutionTools, RemoteServer,
    RemoteToolsOptions, ToolsConfiguration,
};
use promptforge::pipeline::compile_pipeline;
use promptforge::ExecutionToolsError;

const FAN_OUT: &str = r#"# Fan out

- INPUT PARAMETER {name}
- OUTPUT PARAMETER {morning}
- OUTPUT PARAMETER {evening}

## Morning

```
Good morning {name}
```

-> {morning}

## Evening

```
Good evening {name}
```

-> {evening}
"#;

fn inputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[tokio::test]
async fn test_pipeline_runs_over_identified_connection() {
    let handle = RemoteServer::new(Arc::new(ExecutionToolsRegistry::with_defaults()))
        .with_tools(Arc::new(MockedEchoTools::new()))
        .bind("127.0.0.1:0")
        .await
        .unwrap();

    let remote = Arc::new(RemoteExecutionTools::new(RemoteToolsOptions::identified(
        handle.local_addr().to_string(),
        "integration",
    )));
    let mut progress = remote.subscribe_progress();

    let executor = PipelineExecutor::new(
        compile_pipeline(FAN_OUT).unwrap(),
        ExecutorTools::new(remote.clone()),
        ExecutorOptions::default(),
    )
    .unwrap();
    let outputs = executor.execute_or_fail(&inputs(&[("name", "Ada")])).await.unwrap();

    assert_eq!(outputs["morning"], "Good morning Ada");
    assert_eq!(outputs["evening"], "Good evening Ada");

    // Both requests were multiplexed over one connection and reported progress.
    let first = progress.next().await.unwrap().unwrap();
    assert!(first.progress.is_started);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_anonymous_client_brings_configuration() {
    let handle = RemoteServer::new(Arc::new(ExecutionToolsRegistry::with_defaults()))
        .bind("127.0.0.1:0")
        .await
        .unwrap();

    let remote = RemoteExecutionTools::new(RemoteToolsOptions::anonymous(
        handle.local_addr().to_string(),
        vec![ToolsConfiguration::new("mocked-echo")],
    ));
    let models = remote.list_models().await.unwrap();
    assert!(models.iter().any(|model| model.model_name == "mocked-echo"));

    let executor = PipelineExecutor::new(
        compile_pipeline(FAN_OUT).unwrap(),
        ExecutorTools::new(Arc::new(remote)),
        ExecutorOptions::default(),
    )
    .unwrap();
    let report = executor.execute(&inputs(&[("name", "Bo")])).await.unwrap();
    assert!(report.is_successful());
    assert_eq!(report.executions.len(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_unknown_provider_is_reported_to_client() {
    let handle = RemoteServer::new(Arc::new(ExecutionToolsRegistry::with_defaults()))
        .bind("127.0.0.1:0")
        .await
        .unwrap();

    let remote = RemoteExecutionTools::new(RemoteToolsOptions::anonymous(
        handle.local_addr().to_string(),
        vec![ToolsConfiguration::new("no-such-provider")],
    ));
    let err = remote.list_models().await.unwrap_err();
    assert!(matches!(err, ExecutionToolsError::UnknownProvider(ref name) if name == "no-such-provider"));

    handle.shutdown().await;
}
