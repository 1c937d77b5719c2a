use whatlang::Lang;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FashionPreset {
    Custom,
    OutfitVariation,
    AccessoryAddition,
    ProductExtraction,
    ProductPhotography,
    ColorChange,
    StyleTransfer,
    BackgroundChange,
}

impl FashionPreset {
    pub const ALL: [Self; 8] = [
        Self::Custom,
        Self::OutfitVariation,
        Self::AccessoryAddition,
        Self::ProductExtraction,
        Self::ProductPhotography,
        Self::ColorChange,
        Self::StyleTransfer,
        Self::BackgroundChange,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::OutfitVariation => "outfit_variation",
            Self::AccessoryAddition => "accessory_addition",
            Self::ProductExtraction => "product_extraction",
            Self::ProductPhotography => "product_photography",
            Self::ColorChange => "color_change",
            Self::StyleTransfer => "style_transfer",
            Self::BackgroundChange => "background_change",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|preset| preset.as_str() == value)
    }

    fn template(self) -> Option<&'static str> {
        let text = match self {
            Self::Custom => return None,
            Self::OutfitVariation => "Change the outfit while preserving the model's pose, facial features, and body proportions. Maintain fabric textures and realistic lighting.",
            Self::AccessoryAddition => "Add the accessory to the outfit while maintaining the original pose, lighting, and all existing details of the clothing and model.",
            Self::ProductExtraction => "Extract this exact product/garment and place it on a clean, professional background while preserving all details, textures, and colors.",
            Self::ProductPhotography => "Convert this garment into a professional product photography shot with a light gray background. Present the garment as a clean, centered product photo with professional studio lighting, removing any model or person, showing only the clothing item in perfect condition with natural shadows and high-end e-commerce styling.",
            Self::ColorChange => "Change only the color of the specified garment while preserving all textures, patterns, fabric details, and the overall composition.",
            Self::StyleTransfer => "Transform the clothing style while maintaining the model's pose, facial features, and the overall composition of the image.",
            Self::BackgroundChange => "Change only the background while preserving the model, outfit, pose, lighting, and all clothing details exactly as they are.",
        };
        Some(text)
    }
}

/// Instruction for the image-edit node. The free text is appended to a
/// preset template only when it is non-blank; unknown presets and `custom`
/// pass the free text through unchanged.
pub fn compose_fashion_prompt(preset: &str, free_text: &str) -> String {
    let Some(template) = FashionPreset::parse(preset).and_then(FashionPreset::template) else {
        return free_text.to_string();
    };
    if free_text.trim().is_empty() {
        template.to_string()
    } else {
        format!("{template}. {free_text}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeminiMode {
    Generate,
    Edit,
    CharacterConsistency,
    MultiImageFusion,
    PromptBasedEditing,
    WorldKnowledge,
    Custom,
}

impl GeminiMode {
    pub const ALL: [Self; 7] = [
        Self::Generate,
        Self::Edit,
        Self::CharacterConsistency,
        Self::MultiImageFusion,
        Self::PromptBasedEditing,
        Self::WorldKnowledge,
        Self::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Edit => "edit",
            Self::CharacterConsistency => "character_consistency",
            Self::MultiImageFusion => "multi_image_fusion",
            Self::PromptBasedEditing => "prompt_based_editing",
            Self::WorldKnowledge => "world_knowledge",
            Self::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|mode| mode.as_str() == value)
    }

    fn render(self, text: &str) -> String {
        match self {
            Self::Generate | Self::Custom => text.to_string(),
            Self::Edit => format!(
                "Edit the provided image based on this request: {text}. Maintain the overall composition and only change what's specifically requested."
            ),
            Self::CharacterConsistency => format!(
                "Maintain the exact same character/subject from the reference image and {text}. Preserve all facial features, clothing, distinctive characteristics, and personality while adapting to the new context."
            ),
            Self::MultiImageFusion => format!(
                "Seamlessly blend and merge elements from the provided images to create: {text}. Maintain realistic lighting, perspective, and natural composition."
            ),
            Self::PromptBasedEditing => format!(
                "Make these specific targeted changes to the image: {text}. Use precise local edits while preserving all other elements exactly as they are. Maintain photorealistic quality."
            ),
            Self::WorldKnowledge => format!(
                "Using your comprehensive knowledge of the real world, {text}. Ensure factual accuracy, realistic representation, and attention to real-world details."
            ),
        }
    }
}

/// Instruction for the image-generation node; templates always embed the
/// free text.
pub fn compose_gemini_prompt(mode: &str, free_text: &str) -> String {
    match GeminiMode::parse(mode) {
        Some(mode) => mode.render(free_text),
        None => free_text.to_string(),
    }
}

/// Best-effort language code of `text`, `"en"` when unsure.
pub fn detect_language(text: &str) -> String {
    if text.trim().chars().count() < 3 {
        return String::from("en");
    }
    match whatlang::detect(text) {
        Some(info) if info.lang() == Lang::Eng => String::from("en"),
        Some(info) => info.lang().code().to_string(),
        None => String::from("en"),
    }
}

pub fn compose_chat_instruction(
    system_prompt: &str,
    user_prompt: &str,
    detected_language: &str,
    max_characters: u32,
) -> String {
    format!(
        "{system_prompt}\n\n{}",
        compose_conversation_turn(user_prompt, detected_language, max_characters)
    )
}

pub fn compose_conversation_turn(
    user_prompt: &str,
    detected_language: &str,
    max_characters: u32,
) -> String {
    format!(
        "User request (detected language: {detected_language}): {user_prompt}\n\nPlease respond in English with a maximum of {max_characters} characters."
    )
}
