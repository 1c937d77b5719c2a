use serde::Serialize;

use super::chat::{
    OpenAiChatNode, DEFAULT_MAX_CHARACTERS, DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT, MAX_CHARACTERS,
    MIN_CHARACTERS,
};
use super::conversation::OpenAiConversationNode;
use super::gemini_flash::{self, GeminiFlashNode};
use super::image_fidelity::{self, ImageFidelityNode};
use super::virtual_try_on::VirtualTryOnNode;
use crate::prompt::{FashionPreset, GeminiMode};
use crate::vendors::gemini::{DEFAULT_GEMINI_MODEL, GEMINI_MODELS};
use crate::vendors::openai_chat::{CHAT_MODELS, DEFAULT_CHAT_MODEL};
use crate::vendors::{openai_images, tryon};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputKind {
    String { multiline: bool, default: String },
    Choice { options: Vec<String>, default: String },
    Int { min: i64, max: i64, default: i64 },
    Bool { default: bool },
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSpec {
    pub name: &'static str,
    pub required: bool,
    #[serde(flatten)]
    pub kind: InputKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    String,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSpec {
    pub name: &'static str,
    pub kind: OutputKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDescriptor {
    pub name: &'static str,
    pub display_name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

impl NodeDescriptor {
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|input| input.name == name)
    }
}

fn text(name: &'static str, required: bool, multiline: bool, default: &str) -> InputSpec {
    InputSpec {
        name,
        required,
        kind: InputKind::String {
            multiline,
            default: default.to_string(),
        },
    }
}

fn choice<'a>(name: &'static str, options: impl IntoIterator<Item = &'a str>, default: &str) -> InputSpec {
    InputSpec {
        name,
        required: true,
        kind: InputKind::Choice {
            options: options.into_iter().map(str::to_string).collect(),
            default: default.to_string(),
        },
    }
}

fn image(name: &'static str, required: bool) -> InputSpec {
    InputSpec {
        name,
        required,
        kind: InputKind::Image,
    }
}

fn flag(name: &'static str, default: bool) -> InputSpec {
    InputSpec {
        name,
        required: false,
        kind: InputKind::Bool { default },
    }
}

fn output(name: &'static str, kind: OutputKind) -> OutputSpec {
    OutputSpec { name, kind }
}

fn chat_inputs() -> Vec<InputSpec> {
    vec![
        text("api_key", false, false, ""),
        text("user_prompt", true, true, DEFAULT_USER_PROMPT),
        choice("model", CHAT_MODELS, DEFAULT_CHAT_MODEL),
        InputSpec {
            name: "max_characters",
            required: true,
            kind: InputKind::Int {
                min: i64::from(MIN_CHARACTERS),
                max: i64::from(MAX_CHARACTERS),
                default: i64::from(DEFAULT_MAX_CHARACTERS),
            },
        },
        text("system_prompt", false, true, DEFAULT_SYSTEM_PROMPT),
        image("image_1", false),
        image("image_2", false),
        image("image_3", false),
        flag("use_env_key", true),
    ]
}

/// Every node this crate exposes, in display order.
pub fn node_catalog() -> Vec<NodeDescriptor> {
    let images_defaults = openai_images::ImageEditParams::default();

    let mut conversation_inputs = chat_inputs();
    conversation_inputs.push(flag("clear_history", false));

    vec![
        NodeDescriptor {
            name: OpenAiChatNode::NAME,
            display_name: "OpenAI Chat",
            category: "OpenAI",
            description: "Single-turn chat with up to three images; replies are trimmed to max_characters.",
            inputs: chat_inputs(),
            outputs: vec![output("response_text", OutputKind::String)],
        },
        NodeDescriptor {
            name: OpenAiConversationNode::NAME,
            display_name: "OpenAI Conversation",
            category: "OpenAI",
            description: "Multi-turn chat that replays the last ten exchanges.",
            inputs: conversation_inputs,
            outputs: vec![
                output("response_text", OutputKind::String),
                output("conversation_summary", OutputKind::String),
            ],
        },
        NodeDescriptor {
            name: ImageFidelityNode::NAME,
            display_name: "OpenAI Image Fidelity (Fashion)",
            category: "OpenAI",
            description: "High input-fidelity garment edits via the Images or Responses API.",
            inputs: vec![
                text("api_key", true, false, ""),
                text("prompt", true, true, image_fidelity::DEFAULT_PROMPT),
                image("primary_image", true),
                choice("input_fidelity", openai_images::INPUT_FIDELITIES, images_defaults.input_fidelity.as_str()),
                choice("quality", openai_images::QUALITIES, images_defaults.quality.as_str()),
                choice("size", openai_images::SIZES, images_defaults.size.as_str()),
                choice("output_format", openai_images::OUTPUT_FORMATS, images_defaults.output_format.as_str()),
                choice("background", openai_images::BACKGROUNDS, images_defaults.background.as_str()),
                choice("fashion_preset", FashionPreset::ALL.map(FashionPreset::as_str), "custom"),
                choice("api_method", openai_images::API_METHODS, "responses_api"),
                image("reference_image", false),
                image("mask_image", false),
            ],
            outputs: vec![
                output("image", OutputKind::Image),
                output("revised_prompt", OutputKind::String),
                output("debug_info", OutputKind::String),
            ],
        },
        NodeDescriptor {
            name: GeminiFlashNode::NAME,
            display_name: "Gemini 2.5 Flash Image",
            category: "Google",
            description: "Image generation, editing and fusion with Gemini 2.5 Flash Image.",
            inputs: vec![
                text("api_key", true, false, ""),
                text("prompt", true, true, gemini_flash::DEFAULT_PROMPT),
                choice("mode", GeminiMode::ALL.map(GeminiMode::as_str), "generate"),
                choice("model", GEMINI_MODELS, DEFAULT_GEMINI_MODEL),
                image("primary_image", false),
                image("reference_image", false),
                image("secondary_image", false),
                image("mask_image", false),
            ],
            outputs: vec![
                output("image", OutputKind::Image),
                output("text_response", OutputKind::String),
                output("debug_info", OutputKind::String),
            ],
        },
        NodeDescriptor {
            name: VirtualTryOnNode::NAME,
            display_name: "Virtual Try-On",
            category: "YourMirror",
            description: "Renders a product onto a person photo through the YourMirror API.",
            inputs: vec![
                text("api_key", true, false, ""),
                image("base_image", true),
                image("product_image", true),
                choice("workflow_type", tryon::WORKFLOW_TYPES, "eyewear"),
                choice("quality", tryon::QUALITIES, "normal"),
                image("mask_image", false),
            ],
            outputs: vec![
                output("image", OutputKind::Image),
                output("debug_logs", OutputKind::String),
            ],
        },
    ]
}

pub fn find_node(name: &str) -> Option<NodeDescriptor> {
    node_catalog().into_iter().find(|node| node.name == name)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::nodes::chat::ChatRequest;
    use crate::nodes::gemini_flash::GeminiFlashRequest;
    use crate::nodes::image_fidelity::ImageFidelityRequest;
    use crate::nodes::virtual_try_on::VirtualTryOnRequest;

    fn default_of(node: &NodeDescriptor, input: &str) -> String {
        match &node.input(input).map(|spec| &spec.kind) {
            Some(InputKind::String { default, .. }) | Some(InputKind::Choice { default, .. }) => default.clone(),
            other => panic!("{input} has no string default: {other:?}"),
        }
    }

    #[test]
    fn names_are_unique_and_resolvable() {
        let catalog = node_catalog();
        let names: HashSet<_> = catalog.iter().map(|node| node.name).collect();
        assert_eq!(names.len(), 5);
        for name in names {
            assert_eq!(find_node(name).map(|node| node.name), Some(name));
        }
        assert!(find_node("unknown").is_none());
    }

    #[test]
    fn choice_defaults_are_among_options() {
        for node in node_catalog() {
            for input in &node.inputs {
                if let InputKind::Choice { options, default } = &input.kind {
                    assert!(options.contains(default), "{}.{}", node.name, input.name);
                }
            }
        }
    }

    #[test]
    fn defaults_match_request_structs() {
        let chat = find_node(OpenAiChatNode::NAME).expect("chat");
        let chat_default = ChatRequest::default();
        assert_eq!(default_of(&chat, "model"), chat_default.model);
        assert_eq!(default_of(&chat, "user_prompt"), chat_default.user_prompt);

        let fidelity = find_node(ImageFidelityNode::NAME).expect("fidelity");
        let fidelity_default = ImageFidelityRequest::default();
        assert_eq!(default_of(&fidelity, "prompt"), fidelity_default.prompt);
        assert_eq!(default_of(&fidelity, "api_method"), fidelity_default.api_method);
        assert_eq!(default_of(&fidelity, "fashion_preset"), fidelity_default.fashion_preset);

        let gemini = find_node(GeminiFlashNode::NAME).expect("gemini");
        let gemini_default = GeminiFlashRequest::default();
        assert_eq!(default_of(&gemini, "mode"), gemini_default.mode);
        assert_eq!(default_of(&gemini, "model"), gemini_default.model);

        let tryon = find_node(VirtualTryOnNode::NAME).expect("try-on");
        let tryon_default = VirtualTryOnRequest::default();
        assert_eq!(default_of(&tryon, "workflow_type"), tryon_default.workflow_type);
        assert_eq!(default_of(&tryon, "quality"), tryon_default.quality);
    }

    #[test]
    fn serializes_kind_inline() {
        let node = find_node(OpenAiChatNode::NAME).expect("chat");
        let spec = serde_json::to_value(node.input("max_characters").expect("input")).expect("json");
        assert_eq!(
            spec,
            json!({"name": "max_characters", "required": true, "kind": "int", "min": 50, "max": 2000, "default": 500})
        );
    }
}
