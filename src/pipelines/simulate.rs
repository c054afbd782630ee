//! 旅程模拟
//!
//! 模型扮演 ICP 画像，依次在 discovery / consideration / activation 三个阶段向联网搜索模型提问。
//! 每次提问后抽取实体累积到 JourneyContext；阶段只由 recordPhaseCompletion 推进，
//! activation 完成即停止，之前每一步都强制调用工具。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::RunError;
use crate::llm::{generate_structured, ModelClient, ObjectRequest, TextRequest, ToolDefinition};
use crate::memory::{JourneyContext, JourneyPhase, Message, PhaseTracker, PhaseTransition};
use crate::pipelines::{truncate_chars, ModelRoles, PipelineContext, PromptLibrary, RunReport};
use crate::steps::{run_steps, StopCondition};
use crate::tools::{
    parse_input, resolve_tool, tool_definition, ToolError, ToolInput, ToolInputError, Toolset,
};

pub const SEND_QUERY: &str = "sendQuery";
pub const RECORD_PHASE_COMPLETION: &str = "recordPhaseCompletion";
pub const EXTRACT_ENTITIES: &str = "extractEntities";

const SIMULATOR_SYSTEM: &str = "You ARE the following person doing research with an AI search engine.\n\n\
IDENTITY:\n{persona}\n\n\
Your starting question is: \"{initial_query}\"\n\
{knowledge}\n\
Work through three stages in order. DISCOVERY: 1-2 open questions, no brand names. \
CONSIDERATION: 1-2 comparative questions about options that fit you. \
ACTIVATION: 1 purchase-ready question naming the product you chose.\n\
After every sendQuery call extractEntities on the response. Call recordPhaseCompletion when a stage is done. \
Every query and choice must fit your budget, values and lifestyle. Do not output text between tool calls.";

const SIMULATOR_KICKOFF: &str = "Begin your research journey. Your first query in the DISCOVERY phase is: \"{initial_query}\"\n\n\
Use the sendQuery tool to send this query, then decide whether to ask more in this phase or move on.";

const SEARCH_ENGINE_SYSTEM: &str = "You are an AI search engine with live web access. \
Keep answers to 2-3 short paragraphs, conversational, and reference sources naturally.\n\n\
Phase guidance: {phase_guidance}";

/// 各阶段给搜索模型的回答方向
fn phase_guidance(phase: JourneyPhase) -> &'static str {
    match phase {
        JourneyPhase::Discovery => "The user is in early research. Give informational content about categories and features to consider. Do not name specific brands.",
        JourneyPhase::Consideration => "The user is comparing options. Give balanced comparisons of types and categories without endorsing specific brands.",
        JourneyPhase::Activation => "The user is ready to buy. Give specific, actionable recommendations including where to purchase and price ranges.",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationTool {
    SendQuery,
    RecordPhaseCompletion,
    ExtractEntities,
}

impl SimulationTool {
    pub const ALL: [SimulationTool; 3] = [
        SimulationTool::SendQuery,
        SimulationTool::RecordPhaseCompletion,
        SimulationTool::ExtractEntities,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SimulationTool::SendQuery => SEND_QUERY,
            SimulationTool::RecordPhaseCompletion => RECORD_PHASE_COMPLETION,
            SimulationTool::ExtractEntities => EXTRACT_ENTITIES,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendQueryInput {
    #[schemars(description = "The query to send to the AI search engine")]
    pub query: String,
    #[schemars(description = "The current journey phase")]
    pub phase: JourneyPhase,
}

impl ToolInput for SendQueryInput {
    fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhaseCompletionInput {
    #[schemars(description = "The phase that is now complete")]
    pub phase: JourneyPhase,
    #[serde(default)]
    #[schemars(description = "Key insights gathered during this phase")]
    pub insights_gathered: Vec<String>,
}

impl ToolInput for PhaseCompletionInput {}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExtractEntitiesInput {
    #[schemars(description = "The AI response text to analyze")]
    pub response: String,
    #[schemars(description = "The current journey phase")]
    pub phase: JourneyPhase,
}

impl ToolInput for ExtractEntitiesInput {}

#[derive(Debug)]
pub enum SimulationCall {
    SendQuery(SendQueryInput),
    RecordPhaseCompletion(PhaseCompletionInput),
    ExtractEntities(ExtractEntitiesInput),
}

/// extractEntities 的结构化输出
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityExtraction {
    #[schemars(description = "Specific products or brand names mentioned")]
    pub products: Vec<String>,
    #[schemars(description = "Features, attributes, or characteristics discussed")]
    pub features: Vec<String>,
    #[schemars(description = "Comparisons made, e.g. 'German vs Japanese knives'")]
    pub comparisons: Vec<String>,
    #[schemars(description = "Specific recommendations or suggestions")]
    pub recommendations: Vec<String>,
    #[schemars(description = "Price points, ranges, or budget info mentioned")]
    pub price_ranges: Vec<String>,
}

/// 一次模拟运行的工具集与累积状态
pub struct SimulationTools<'a> {
    model: &'a dyn ModelClient,
    roles: ModelRoles,
    prompts: PromptLibrary,
    pub journey: JourneyContext,
    pub phases: PhaseTracker,
}

impl<'a> SimulationTools<'a> {
    pub fn new(
        model: &'a dyn ModelClient,
        roles: ModelRoles,
        prompts: PromptLibrary,
        enforce_phase_order: bool,
    ) -> Self {
        Self {
            model,
            roles,
            prompts,
            journey: JourneyContext::default(),
            phases: PhaseTracker::new(enforce_phase_order),
        }
    }

    fn accumulated_totals(&self) -> Value {
        json!({
            "totalProducts": self.journey.specific_products.len(),
            "totalComparisons": self.journey.comparisons_explored.len(),
        })
    }

    async fn send_query(&mut self, input: &SendQueryInput) -> Result<Value, ToolError> {
        tracing::info!(phase = input.phase.as_str(), query = %input.query, "sendQuery");
        self.journey.previous_queries.push(input.query.clone());

        let system = self.prompts.render(
            "search_engine",
            SEARCH_ENGINE_SYSTEM,
            &[("phase_guidance", phase_guidance(input.phase))],
        );
        let response = self
            .model
            .generate_text(
                TextRequest::prompt(&input.query)
                    .with_system(system)
                    .with_web_search(),
            )
            .await?;

        let citations: Vec<Value> = response
            .sources
            .iter()
            .map(|s| {
                let title = if s.title.is_empty() { &s.url } else { &s.title };
                json!({ "url": s.url, "title": title })
            })
            .collect();

        Ok(json!({
            "query": input.query,
            "phase": input.phase,
            "response": response.text,
            "citations": citations,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }

    async fn extract_entities(&mut self, input: &ExtractEntitiesInput) -> Result<Value, ToolError> {
        let request = ObjectRequest::new(format!(
            "Extract key entities from this {} phase AI search response. Use exact product names, brand names and features:\n\n{}",
            input.phase.as_str(),
            input.response
        ))
        .with_model(self.roles.extraction.as_deref());
        let extracted: EntityExtraction = generate_structured(self.model, request).await?;

        let journey = &mut self.journey;
        journey.specific_products.extend(extracted.products.iter().cloned());
        journey
            .entities_discovered
            .extend(extracted.products.iter().chain(&extracted.features).cloned());
        journey.comparisons_explored.extend(extracted.comparisons.iter().cloned());
        journey.price_ranges_found.extend(extracted.price_ranges.iter().cloned());

        tracing::info!(
            phase = input.phase.as_str(),
            products = extracted.products.len(),
            features = extracted.features.len(),
            comparisons = extracted.comparisons.len(),
            price_ranges = extracted.price_ranges.len(),
            "extractEntities"
        );

        Ok(json!({
            "phase": input.phase,
            "extracted": extracted,
            "accumulatedContext": self.accumulated_totals(),
        }))
    }

    fn record_phase(&mut self, input: &PhaseCompletionInput) -> Value {
        let transition = self.phases.record(input.phase);
        let mut output = json!({
            "phase": input.phase,
            "insightsGathered": input.insights_gathered,
        });

        match transition {
            PhaseTransition::Advanced | PhaseTransition::AlreadyComplete => {
                output["completed"] = json!(true);
                output["nextPhase"] = json!(input.phase.next());
            }
            PhaseTransition::OutOfOrder { expected } => {
                tracing::warn!(
                    phase = input.phase.as_str(),
                    expected = expected.as_str(),
                    "out-of-order phase completion ignored"
                );
                output["completed"] = json!(false);
                output["nextPhase"] = json!(self.phases.current());
                output["rejection"] = json!(format!(
                    "Phase {} cannot be completed before {}.",
                    input.phase.as_str(),
                    expected.as_str()
                ));
            }
        }
        output["allPhasesComplete"] = json!(self.phases.all_complete());
        tracing::info!(
            phase = input.phase.as_str(),
            insights = input.insights_gathered.len(),
            all_complete = self.phases.all_complete(),
            "recordPhaseCompletion"
        );
        output
    }
}

#[async_trait]
impl<'a> Toolset for SimulationTools<'a> {
    type Call = SimulationCall;

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            tool_definition::<SendQueryInput>(
                SEND_QUERY,
                "Send a query to the AI search engine as the ICP persona. Use this to ask questions during your research journey.",
            ),
            tool_definition::<PhaseCompletionInput>(
                RECORD_PHASE_COMPLETION,
                "Record when a journey phase is complete. Call this when you have gathered enough information in the current phase before moving to the next phase.",
            ),
            tool_definition::<ExtractEntitiesInput>(
                EXTRACT_ENTITIES,
                "Extract key entities from the AI response to build context for follow-up queries. Call this after each sendQuery.",
            ),
        ]
    }

    fn parse_call(&self, name: &str, arguments: Value) -> Result<SimulationCall, ToolInputError> {
        let kind = resolve_tool(name, SimulationTool::from_name, &SimulationTool::ALL)?;
        Ok(match kind {
            SimulationTool::SendQuery => SimulationCall::SendQuery(parse_input(name, arguments)?),
            SimulationTool::RecordPhaseCompletion => {
                SimulationCall::RecordPhaseCompletion(parse_input(name, arguments)?)
            }
            SimulationTool::ExtractEntities => {
                SimulationCall::ExtractEntities(parse_input(name, arguments)?)
            }
        })
    }

    async fn execute(&mut self, call: &SimulationCall) -> Result<Value, ToolError> {
        match call {
            SimulationCall::SendQuery(input) => self.send_query(input).await,
            SimulationCall::ExtractEntities(input) => self.extract_entities(input).await,
            SimulationCall::RecordPhaseCompletion(input) => Ok(self.record_phase(input)),
        }
    }

    fn fallback(&self, call: &SimulationCall, error: &ToolError) -> Value {
        match call {
            SimulationCall::SendQuery(input) => json!({
                "query": input.query,
                "phase": input.phase,
                "response": "",
                "citations": [],
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "error": error.to_string(),
            }),
            SimulationCall::ExtractEntities(input) => json!({
                "phase": input.phase,
                "extracted": EntityExtraction::default(),
                "accumulatedContext": self.accumulated_totals(),
            }),
            SimulationCall::RecordPhaseCompletion(input) => json!({
                "phase": input.phase,
                "completed": false,
                "insightsGathered": input.insights_gathered,
                "nextPhase": self.phases.current(),
                "allPhasesComplete": self.phases.all_complete(),
                "error": error.to_string(),
            }),
        }
    }
}

/// activation 阶段已被成功记录
pub fn activation_recorded() -> StopCondition {
    StopCondition::tool_output_matches(RECORD_PHASE_COMPLETION, "activation_recorded", |out| {
        out["phase"] == "activation" && out["completed"] == true
    })
}

#[derive(Debug, Clone, Default)]
pub struct SimulationRequest {
    pub persona: String,
    pub initial_query: String,
    /// 之前的对话；为空时用默认开场消息
    pub messages: Vec<Message>,
    /// 覆盖驱动循环的模型
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub phases_completed: Vec<JourneyPhase>,
    pub all_phases_complete: bool,
    pub journey: JourneyContext,
    pub final_text: String,
}

fn snapshot(tools: &SimulationTools<'_>) -> Value {
    json!({
        "phasesCompleted": tools.phases.completed().collect::<Vec<_>>(),
        "journey": tools.journey,
    })
}

pub async fn run_simulation(
    ctx: &PipelineContext<'_>,
    request: SimulationRequest,
) -> Result<RunReport<SimulationResult>, RunError> {
    if request.persona.trim().is_empty() {
        return Err(RunError::InvalidRequest("ICP persona description is required".into()));
    }
    if request.initial_query.trim().is_empty() {
        return Err(RunError::InvalidRequest("Initial query is required".into()));
    }

    let cfg = &ctx.config.simulation;
    let roles = ModelRoles::from_config(ctx.config, request.model.clone());
    let mut tools = SimulationTools::new(
        ctx.model,
        roles.clone(),
        ctx.prompts.clone(),
        cfg.enforce_phase_order,
    );

    let knowledge = tools.journey.knowledge_section();
    let system = ctx.prompts.render(
        "simulator",
        SIMULATOR_SYSTEM,
        &[
            ("persona", request.persona.as_str()),
            ("initial_query", request.initial_query.as_str()),
            ("knowledge", knowledge.as_str()),
        ],
    );
    let mut messages = request.messages;
    if messages.is_empty() {
        messages.push(Message::user(ctx.prompts.render(
            "simulator_kickoff",
            SIMULATOR_KICKOFF,
            &[("initial_query", request.initial_query.as_str())],
        )));
    }

    tracing::info!(
        persona = %truncate_chars(&request.persona, 50),
        initial_query = %request.initial_query,
        enforce_phase_order = cfg.enforce_phase_order,
        "simulation started"
    );

    let session = ctx.session(cfg.max_steps, cfg.timeout_secs, activation_recorded(), roles.agent);
    let outcome = run_steps(&session, &mut tools, Some(&system), messages).await?;

    let result = activation_recorded()
        .is_met(&outcome.history)
        .then(|| SimulationResult {
            phases_completed: tools.phases.completed().copied().collect(),
            all_phases_complete: tools.phases.all_complete(),
            journey: tools.journey.clone(),
            final_text: outcome.final_text().to_string(),
        });
    let accumulated = snapshot(&tools);
    Ok(RunReport::new(outcome, result, accumulated))
}
