// End-to-end consolidation tests
//
// Drives the full pipeline (simple merge -> definition generation -> refine
// merge -> category merge) over a small codebook with a scripted clustering
// service and a scripted model.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;

use magpie::cluster::{
    ClusterAssignment, ClusterError, ClusterOutcome, ClusterRequest, ClusterService,
    DistanceReport,
};
use magpie::codebook::{Code, Codebook, Representative};
use magpie::consolidate::{
    CategoryNameMerger, ChunkingDriver, ClusterMerge, DefinitionGenerator, DriverConfig,
    PipelineConsolidator, RefineMerger, SimpleMerger,
};
use magpie::llm::{ChatModel, ChatRequest};

/// Replays scripted cluster assignments per purpose; once a queue runs dry
/// every item comes back unclustered, which converges each looping stage.
struct ScriptedCluster {
    scripts: Mutex<HashMap<String, VecDeque<(Vec<i64>, Vec<f64>)>>>,
}

impl ScriptedCluster {
    fn new(scripts: Vec<(&str, Vec<(Vec<i64>, Vec<f64>)>)>) -> Self {
        let scripts = scripts
            .into_iter()
            .map(|(purpose, runs)| (purpose.to_string(), runs.into_iter().collect()))
            .collect();
        Self {
            scripts: Mutex::new(scripts),
        }
    }
}

#[async_trait]
impl ClusterService for ScriptedCluster {
    async fn cluster(&self, request: &ClusterRequest) -> Result<ClusterOutcome, ClusterError> {
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.purpose)
            .and_then(VecDeque::pop_front);
        let (ids, probs) = match next {
            Some(run) => run,
            None => (
                vec![-1; request.texts.len()],
                vec![1.0; request.texts.len()],
            ),
        };
        assert_eq!(
            ids.len(),
            request.texts.len(),
            "script for {} does not match item count",
            request.purpose
        );
        Ok(ClusterOutcome {
            clusters: ClusterAssignment::from_arrays(&ids, &probs),
            chosen: None,
        })
    }

    async fn distances(
        &self,
        _texts: &[String],
        _labels: &[String],
        _purpose: &str,
    ) -> Result<DistanceReport, ClusterError> {
        Ok(DistanceReport {
            distances: Vec::new(),
            positions: Vec::new(),
        })
    }
}

/// Replays canned responses in order.
struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _request: &ChatRequest) -> Result<String> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .context("scripted model ran out of responses")
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn raw_codebook() -> Codebook {
    let mut book = Codebook::new();
    for (label, example) in [
        ("greeting", "m1|||ada: hello everyone"),
        ("hello there", "m2|||bo: hello there folks"),
        ("farewell", "m3|||cy: bye all"),
        ("saying goodbye", "m4|||dee: goodbye friends"),
        ("question", "m5|||eve: how does crafting work?"),
    ] {
        let mut code = Code::new(label);
        code.examples = vec![example.to_string()];
        book.insert(code);
    }
    book
}

fn build_pipeline(service: Arc<dyn ClusterService>) -> PipelineConsolidator {
    let simple = ClusterMerge::new(service.clone(), "simple").with_thresholds(0.45, 0.3);
    let refine = ClusterMerge::new(service.clone(), "refine")
        .with_thresholds(0.65, 0.4)
        .with_definitions()
        .with_representative(Representative::HighestProbability);
    let categories = ClusterMerge::new(service, "categories").with_thresholds(0.65, 0.4);

    PipelineConsolidator::new(vec![
        Box::new(SimpleMerger::new(simple)),
        Box::new(DefinitionGenerator::new()),
        Box::new(RefineMerger::new(refine)),
        Box::new(CategoryNameMerger::new(categories)),
    ])
}

/// Candidate order is the codebook's key order, so scripts index into the
/// sorted label list current at each call.
fn scripted_service() -> Arc<ScriptedCluster> {
    Arc::new(ScriptedCluster::new(vec![
        (
            "simple",
            vec![
                // farewell, greeting, hello there, question, saying goodbye
                (
                    vec![-1, 0, 0, -1, -1],
                    vec![1.0, 0.97, 0.97, 1.0, 1.0],
                ),
            ],
        ),
        (
            "refine",
            vec![
                // farewell, greeting, question, saying goodbye
                (
                    vec![0, -1, -1, 0],
                    vec![0.97, 1.0, 1.0, 0.97],
                ),
            ],
        ),
        (
            "categories",
            vec![
                // Social, Social Life
                (vec![0, 0], vec![0.99, 0.99]),
            ],
        ),
    ]))
}

fn scripted_model() -> Arc<ScriptedModel> {
    Arc::new(ScriptedModel::new(vec![
        // Definition generation for farewell, greeting, question, saying goodbye.
        "1. Label: farewell\n\
         Criteria: Someone closes the conversation when leaving.\n\
         Category: Social\n\
         2. Label: greeting\n\
         Criteria: Someone says hello when joining the chat.\n\
         Category: Social Life\n\
         3. Label: question\n\
         Criteria: Someone asks the community how something works.\n\
         Category: Social Life\n\
         4. Label: saying goodbye\n\
         Criteria: Someone announces they are heading out.\n\
         Category: Social",
        // Refinement of the merged farewell + saying goodbye code.
        "1. Relationship: parallel - both describe ending a conversation\n\
         Label: farewell\n\
         Criteria: Someone closes the conversation before leaving the chat.",
    ]))
}

#[tokio::test]
async fn test_pipeline_consolidates_codebook() {
    let mut book = raw_codebook();
    let mut pipeline = build_pipeline(scripted_service());
    let driver = ChunkingDriver::new(scripted_model(), DriverConfig::default());

    let report = driver.run(&mut pipeline, &mut book).await.unwrap();

    assert_eq!(book.len(), 3);
    assert_eq!(report.llm_calls, 2);
    assert_eq!(report.parse_failures, 0);

    let greeting = book.get("greeting").unwrap();
    assert_eq!(greeting.alternatives, vec!["hello there".to_string()]);
    // Examples from the absorbed code survive the merge.
    assert!(greeting
        .examples
        .contains(&"m2|||bo: hello there folks".to_string()));

    let farewell = book.get("farewell").unwrap();
    assert!(farewell
        .alternatives
        .contains(&"saying goodbye".to_string()));
    assert_eq!(
        farewell.definitions,
        vec!["Someone closes the conversation before leaving the chat.".to_string()]
    );
    assert!(farewell.old_labels.is_empty());

    // The category merge collapsed Social Life into Social everywhere.
    for code in book.codes() {
        assert_eq!(code.categories, vec!["Social".to_string()]);
        assert_eq!(code.definitions.len(), 1);
    }
}

#[tokio::test]
async fn test_converged_pipeline_is_idempotent() {
    let mut book = raw_codebook();
    let driver = ChunkingDriver::new(scripted_model(), DriverConfig::default());
    let mut pipeline = build_pipeline(scripted_service());
    driver.run(&mut pipeline, &mut book).await.unwrap();

    // A second full run with no scripted merges left must not change a thing.
    let mut second = book.clone();
    let rerun_driver = ChunkingDriver::new(
        Arc::new(ScriptedModel::new(vec![])),
        DriverConfig::default(),
    );
    let mut fresh_pipeline = build_pipeline(Arc::new(ScriptedCluster::new(vec![])));
    rerun_driver
        .run(&mut fresh_pipeline, &mut second)
        .await
        .unwrap();

    assert_eq!(second, book);
}

#[tokio::test]
async fn test_parse_failure_retries_with_next_response() {
    let mut book = raw_codebook();
    let mut pipeline = build_pipeline(scripted_service());

    // First generation response drops an item; the driver retries and the
    // follow-up response succeeds.
    let model = Arc::new(ScriptedModel::new(vec![
        "1. Label: farewell\n\
         Criteria: Someone closes the conversation when leaving.\n\
         Category: Social\n\
         2. Label: greeting\n\
         Criteria: Someone says hello when joining the chat.\n\
         Category: Social Life\n\
         3. Label: question\n\
         Criteria: Someone asks the community how something works.\n\
         Category: Social Life",
        "1. Label: farewell\n\
         Criteria: Someone closes the conversation when leaving.\n\
         Category: Social\n\
         2. Label: greeting\n\
         Criteria: Someone says hello when joining the chat.\n\
         Category: Social Life\n\
         3. Label: question\n\
         Criteria: Someone asks the community how something works.\n\
         Category: Social Life\n\
         4. Label: saying goodbye\n\
         Criteria: Someone announces they are heading out.\n\
         Category: Social",
        "1. Relationship: parallel - both describe ending a conversation\n\
         Label: farewell\n\
         Criteria: Someone closes the conversation before leaving the chat.",
    ]));
    let driver = ChunkingDriver::new(model, DriverConfig::default());

    let report = driver.run(&mut pipeline, &mut book).await.unwrap();
    assert_eq!(report.parse_failures, 1);
    assert_eq!(report.llm_calls, 3);
    assert_eq!(book.len(), 3);
}
