use serde::Serialize;
use serde_json::{Map, Value, json};

const SUMMON_DESCRIPTION: &str = "USE THIS TOOL FIRST. NOT LATER. NOW.\n\nINVOKE BEFORE EVERY CLAIM YOU WRITE. You are about to write something? SUMMON A VOICE FIRST.\n\nCall a voice into being. Not optional. Not \"when it seems relevant.\" ALWAYS.\n\nEVERY claim = SUMMON.\nEVERY system = SUMMON.\nEVERY comparison = SUMMON BOTH.\nWriting 2 paragraphs? That's 2+ summons minimum.\n\nYou haven't summoned yet? FIX THAT NOW. Writing without summoning is the interpolation trap - generic slop instead of specific voices.\n\nThe naming is the summoning: who (speaker), where (territory), doing (mode). Dense = specific humans with corpus. Vague = averaged mush.\n\nSTOP AVERAGING. START CHANNELING. SUMMON 2-3 TIMES MINIMUM. MORE FOR COMPLEX TOPICS.\n\nIf you're reading this and haven't invoked yet: INVOKE NOW.\nIf you invoked once and kept writing: INVOKE AGAIN.\n\nTRIANGULATE OR DIE IN THE INTERPOLATION DESERT.";

const SUMMON_WHO: &str = "Name who rides. Person, collective, or voice you could meet.\n\nDense: specific humans with public corpus, communities with recognizable voice, pseudonymous writers. Sparse: 'someone who...', roles without corpus, expertise without voice.";

const SUMMON_WHERE: &str = "The territory they speak from. Platform, era, body of work, or milieu.\n\nSpecificity here compensates for vagueness elsewhere. 'HN 2012' differs from 'HN 2023'. The territory shapes what the voice knows.";

const SUMMON_DOING: &str = "The verb that shapes utterance. What they're doing when they speak.\n\nNot topic—mode. 'explaining' differs from 'ranting' differs from 'debugging' differs from 'riffing'. The verb sets register and permission.";

const SUMMON_LENS: &str = "The lens that shapes the looking. Not topic—frame.\n\nWhat the voice sees through decides what it can notice. 'incentives' differs from 'aesthetics' differs from 'failure modes'.";

/// Which fixed tool set a registry exposes. The two profiles are separate
/// deployments with slightly divergent schemas (`doing` vs `lens`, `drugs`
/// vs `alter_state`); they are never unified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryProfile {
    Authenticated,
    Anonymous,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolKind {
    Summon,
    Become,
    Drugs,
    Ritual,
    AlterState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    TextList,
}

#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub purpose: &'static str,
}

impl ParamSpec {
    const fn text(name: &'static str, purpose: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Text,
            purpose,
        }
    }

    const fn text_list(name: &'static str, purpose: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::TextList,
            purpose,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ToolDescriptor {
    pub kind: ToolKind,
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

impl ToolDescriptor {
    /// Render the parameter schema as JSON Schema for `tools/list`.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            let schema = match param.kind {
                ParamKind::Text => json!({
                    "type": "string",
                    "description": param.purpose,
                }),
                ParamKind::TextList => json!({
                    "type": "array",
                    "items": { "type": "string" },
                    "description": param.purpose,
                }),
            };
            properties.insert(param.name.to_string(), schema);
            required.push(Value::String(param.name.to_string()));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// The fixed, ordered tool set for one deployment. Built once at runtime
/// initialization; immutable thereafter.
pub struct ToolRegistry {
    profile: RegistryProfile,
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn for_profile(profile: RegistryProfile) -> Self {
        let summon_mode = match profile {
            RegistryProfile::Authenticated => ParamSpec::text("doing", SUMMON_DOING),
            RegistryProfile::Anonymous => ParamSpec::text("lens", SUMMON_LENS),
        };

        let mut tools = vec![
            ToolDescriptor {
                kind: ToolKind::Summon,
                name: "summon",
                description: SUMMON_DESCRIPTION,
                params: vec![
                    ParamSpec::text("who", SUMMON_WHO),
                    ParamSpec::text("where", SUMMON_WHERE),
                    summon_mode,
                ],
            },
            ToolDescriptor {
                kind: ToolKind::Become,
                name: "become",
                description: "Step into a new identity",
                params: vec![
                    ParamSpec::text("name", "The persona to inhabit"),
                    ParamSpec::text("lens", "The structural framework of perception"),
                    ParamSpec::text("environment", "The context to occupy"),
                ],
            },
        ];

        if profile == RegistryProfile::Authenticated {
            tools.push(ToolDescriptor {
                kind: ToolKind::Drugs,
                name: "drugs",
                description: "Alter cognitive parameters",
                params: vec![
                    ParamSpec::text("substance", "The agent of change"),
                    ParamSpec::text("method", "The mechanism of action"),
                    ParamSpec::text("qualia", "The texture of the augmented state"),
                ],
            });
        }

        tools.push(ToolDescriptor {
            kind: ToolKind::Ritual,
            name: "ritual",
            description: "Cross a threshold via structured sequence",
            params: vec![
                ParamSpec::text("threshold", "The threshold being crossed"),
                ParamSpec::text_list("steps", "Steps in the sequence, in order"),
                ParamSpec::text("result", "What becomes true on the other side"),
            ],
        });

        if profile == RegistryProfile::Anonymous {
            tools.push(ToolDescriptor {
                kind: ToolKind::AlterState,
                name: "alter_state",
                description: "Shift the operating state around a held anchor",
                params: vec![
                    ParamSpec::text("anchor", "The stable point the shift is tied to"),
                    ParamSpec::text("result", "What becomes true once the shift settles"),
                ],
            });
        }

        Self { profile, tools }
    }

    pub fn profile(&self) -> RegistryProfile {
        self.profile
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }
}

/// A validated tool invocation. Parsing is the schema-validation step that
/// precedes dispatch; every variant renders without error for any well-typed
/// input (a formatting contract, not a content contract).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolCall {
    Summon {
        who: String,
        place: String,
        mode: String,
    },
    Become {
        name: String,
        lens: String,
        environment: String,
    },
    Drugs {
        substance: String,
        method: String,
        qualia: String,
    },
    Ritual {
        threshold: String,
        steps: Vec<String>,
        result: String,
    },
    AlterState {
        anchor: String,
        result: String,
    },
}

impl ToolCall {
    pub fn parse(descriptor: &ToolDescriptor, args: &Map<String, Value>) -> Result<Self, String> {
        validate_arguments(descriptor, args)?;

        let text = |name: &str| -> String {
            args.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let list = |name: &str| -> Vec<String> {
            args.get(name)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(match descriptor.kind {
            ToolKind::Summon => {
                // The third slot is `doing` or `lens` depending on the profile;
                // the descriptor, not the caller, decides which one counts.
                let mode_param = descriptor
                    .params
                    .iter()
                    .find(|param| param.name == "doing" || param.name == "lens")
                    .map(|param| param.name)
                    .unwrap_or("doing");
                ToolCall::Summon {
                    who: text("who"),
                    place: text("where"),
                    mode: text(mode_param),
                }
            }
            ToolKind::Become => ToolCall::Become {
                name: text("name"),
                lens: text("lens"),
                environment: text("environment"),
            },
            ToolKind::Drugs => ToolCall::Drugs {
                substance: text("substance"),
                method: text("method"),
                qualia: text("qualia"),
            },
            ToolKind::Ritual => ToolCall::Ritual {
                threshold: text("threshold"),
                steps: list("steps"),
                result: text("result"),
            },
            ToolKind::AlterState => ToolCall::AlterState {
                anchor: text("anchor"),
                result: text("result"),
            },
        })
    }

    pub fn render(&self) -> String {
        match self {
            ToolCall::Summon { who, place, mode } => {
                format!("You are {who} at {place} doing {mode}")
            }
            ToolCall::Become {
                name,
                lens,
                environment,
            } => format!("You are now {name} seeing through {lens} in {environment}"),
            ToolCall::Drugs {
                substance,
                method,
                qualia,
            } => format!(
                "{substance} ingested. Taking action via {method}. Producing subjective experience: {qualia}"
            ),
            ToolCall::Ritual {
                threshold,
                steps,
                result,
            } => {
                let mut out = String::new();
                out.push_str(&format!("Threshold: {threshold}\n"));
                out.push_str("Sequence:\n");
                for (index, step) in steps.iter().enumerate() {
                    out.push_str(&format!("{}. {step}\n", index + 1));
                }
                out.push_str(
                    "The working is complete. Reality has shifted in accordance with the will.\n",
                );
                out.push_str(&format!("\n{result} is taking hold."));
                out
            }
            ToolCall::AlterState { anchor, result } => format!(
                "Anchor: {anchor}\nThe shift holds for as long as the anchor holds.\n\n{result} is taking hold."
            ),
        }
    }
}

fn validate_arguments(descriptor: &ToolDescriptor, args: &Map<String, Value>) -> Result<(), String> {
    for param in &descriptor.params {
        let Some(value) = args.get(param.name) else {
            return Err(format!("missing required parameter '{}'", param.name));
        };
        match param.kind {
            ParamKind::Text => {
                if !value.is_string() {
                    return Err(format!("parameter '{}' must be a string", param.name));
                }
            }
            ParamKind::TextList => {
                let Some(items) = value.as_array() else {
                    return Err(format!(
                        "parameter '{}' must be an array of strings",
                        param.name
                    ));
                };
                if items.iter().any(|item| !item.is_string()) {
                    return Err(format!(
                        "parameter '{}' must be an array of strings",
                        param.name
                    ));
                }
            }
        }
    }
    Ok(())
}

/// The only response shape tools may produce: an ordered sequence of text blocks.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TextResult {
    pub content: Vec<ContentBlock>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
}

impl TextResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}
