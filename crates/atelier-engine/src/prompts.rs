use atelier_contracts::assets::ImageAsset;
use atelier_contracts::requests::{GenerationRequest, OperationKind};
use atelier_contracts::selection::{BackgroundOption, FitOption, PoseOption};

pub const BACKGROUND_PRESETS: [&str; 6] = [
    "a clean, white studio background",
    "a bustling city street at night with neon lights",
    "a serene beach at sunset",
    "a cozy, rustic coffee shop interior",
    "the top of a mountain with a beautiful view",
    "a futuristic cityscape",
];

pub const SURPRISE_PROMPTS: [&str; 12] = [
    "Give me a cool new hairstyle",
    "Add stylish sunglasses",
    "Change the background to a futuristic cityscape",
    "Put a friendly robot in the background",
    "Make my t-shirt a vintage band shirt",
    "Add a leather jacket",
    "Change the lighting to a golden hour sunset",
    "Add a subtle, magical glow around me",
    "Put a cute cat on my shoulder",
    "Wear a classic fedora hat",
    "Change my shirt to a Hawaiian shirt",
    "Add a simple gold necklace",
];

pub const ENHANCE_PROGRESS: &str = "Applying photo enhancements...";

/// Everything a try-on request is assembled from. Borrowed so the builder never owns or
/// mutates session state.
#[derive(Debug, Clone, Copy)]
pub struct TryOnInputs<'a> {
    pub base_image: &'a ImageAsset,
    pub garments: &'a [ImageAsset],
    pub pose: PoseOption,
    pub custom_pose_text: &'a str,
    pub fit: FitOption,
    pub background: BackgroundOption,
    pub background_text: &'a str,
    pub custom_edit_text: &'a str,
}

impl TryOnInputs<'_> {
    fn has_garments(&self) -> bool {
        !self.garments.is_empty()
    }

    fn custom_pose(&self) -> Option<&str> {
        let text = self.custom_pose_text.trim();
        (self.pose == PoseOption::Custom && !text.is_empty()).then_some(text)
    }

    /// Whether a first generation would change anything at all.
    pub fn has_changes(&self) -> bool {
        self.has_garments()
            || !self.custom_edit_text.trim().is_empty()
            || !self.background_text.trim().is_empty()
            || self.custom_pose().is_some()
    }
}

pub fn try_on_progress_label(inputs: &TryOnInputs<'_>) -> &'static str {
    if inputs.has_garments() {
        "Simulating your new outfit..."
    } else if !inputs.background_text.trim().is_empty()
        || inputs.background == BackgroundOption::Outfit
    {
        "Compositing new background..."
    } else if !inputs.custom_edit_text.trim().is_empty() {
        "Executing custom refinements..."
    } else {
        "Generating your image..."
    }
}

fn pose_instruction(inputs: &TryOnInputs<'_>) -> String {
    match inputs.pose {
        PoseOption::Replicate if inputs.has_garments() => {
            "Make the SUBJECT adopt the pose shown in IMAGE_1.".to_string()
        }
        PoseOption::Custom => match inputs.custom_pose() {
            Some(text) => format!("Make the SUBJECT adopt this pose: \"{text}\"."),
            None => keep_pose_instruction(),
        },
        _ => keep_pose_instruction(),
    }
}

fn keep_pose_instruction() -> String {
    "Keep the original pose of the SUBJECT from IMAGE_0.".to_string()
}

fn clothing_instruction(inputs: &TryOnInputs<'_>) -> &'static str {
    if inputs.has_garments() {
        "Take every garment and accessory from IMAGE_1 and any later images and place them photorealistically onto the SUBJECT."
    } else {
        "Do not change the clothing on the SUBJECT."
    }
}

pub fn fit_instruction(fit: FitOption) -> &'static str {
    match fit {
        FitOption::Slim => {
            "Apply a SLIM fit to the clothing so it follows the SUBJECT's body contours closely."
        }
        FitOption::Regular => "Apply a REGULAR, classic fit to the clothing.",
        FitOption::Loose => "Apply a LOOSE fit to the clothing with a relaxed drape.",
        FitOption::Baggy => "Apply a BAGGY fit to the clothing so it looks very loose and roomy.",
        FitOption::Oversized => {
            "Apply an OVERSIZED fit to the clothing with exaggerated, fashion-forward proportions."
        }
    }
}

const OUTFIT_BACKGROUND_INSTRUCTION: &str = "\
Replace the background with the background from IMAGE_1. \
Composite the SUBJECT into it seamlessly, matching lighting and perspective.";

fn background_instruction(inputs: &TryOnInputs<'_>) -> String {
    let scene = inputs.background_text.trim();
    match inputs.background {
        BackgroundOption::Outfit if inputs.has_garments() => {
            OUTFIT_BACKGROUND_INSTRUCTION.to_string()
        }
        // Without a garment image there is no outfit scene to borrow.
        BackgroundOption::Outfit => keep_background_instruction(),
        BackgroundOption::Custom if !scene.is_empty() => format!(
            "Replace the background with a new, photorealistic scene: \"{scene}\". Match the lighting on the SUBJECT to the new scene."
        ),
        BackgroundOption::Custom => keep_background_instruction(),
    }
}

fn keep_background_instruction() -> String {
    "Keep the original background from IMAGE_0.".to_string()
}

fn custom_edit_instruction(inputs: &TryOnInputs<'_>) -> String {
    let text = inputs.custom_edit_text.trim();
    if text.is_empty() {
        "No other changes.".to_string()
    } else {
        format!("Apply this final change: \"{text}\".")
    }
}

pub fn build_try_on_request(inputs: &TryOnInputs<'_>) -> GenerationRequest {
    let mut attachments = Vec::with_capacity(1 + inputs.garments.len());
    attachments.push(inputs.base_image.clone());
    attachments.extend(inputs.garments.iter().cloned());

    let lines = [
        "MISSION: PHOTO EDIT - VIRTUAL TRY-ON".to_string(),
        String::new(),
        "RULE 1: IDENTITY LOCK".to_string(),
        "- IMAGE_0 contains the SUBJECT. Their face, body, hair and skin tone are the only source of truth.".to_string(),
        "- Never alter the SUBJECT's identity in any way.".to_string(),
        "- Every other image (IMAGE_1, IMAGE_2, ...) is a CLOTHING ASSET. Any person shown in them is a MANNEQUIN.".to_string(),
        "- Ignore and discard the face, body and identity of every MANNEQUIN.".to_string(),
        "- The output must show the exact, unaltered person from IMAGE_0.".to_string(),
        String::new(),
        "TASK STEPS (IN ORDER):".to_string(),
        "1. IDENTIFY SUBJECT: lock the person in IMAGE_0 as the unchangeable SUBJECT.".to_string(),
        "2. EXTRACT ASSETS: from IMAGE_1 onwards take ONLY clothing and accessories, never the MANNEQUINS.".to_string(),
        format!("3. APPLY POSE: {}", pose_instruction(inputs)),
        format!("4. APPLY CLOTHING: {}", clothing_instruction(inputs)),
        format!("5. APPLY FIT: {}", fit_instruction(inputs.fit)),
        format!("6. APPLY BACKGROUND: {}", background_instruction(inputs)),
        format!("7. APPLY CUSTOM EDITS: {}", custom_edit_instruction(inputs)),
        "8. RENDER FINAL IMAGE: the SUBJECT from IMAGE_0 must be the person in the photo.".to_string(),
    ];

    GenerationRequest {
        kind: OperationKind::Generate,
        attachments,
        instructions: lines.join("\n"),
    }
}

const ENHANCE_INSTRUCTIONS: &str = "\
MISSION: PHOTOREALISTIC QUALITY ENHANCEMENT

STAGE 1: ANALYSIS AND PREPARATION
1. NOISE REDUCTION: remove luminance and chrominance noise subtly, keeping edges and textures intact.
2. DYNAMIC RANGE: recover highlight and shadow detail without a flat or artificial HDR look.

STAGE 2: COLOR AND TONE
3. TONE MAPPING: apply a gentle S-curve for rich contrast. Blacks stay deep but not crushed, whites bright but not clipped.
4. COLOR CORRECTION: neutralise white balance, then lift vibrancy slightly while keeping skin tones natural and accurate.

STAGE 3: DETAIL AND CLARITY
5. SHARPENING: enhance micro-contrast in fabric, hair and surroundings with a small radius. No halos, no over-sharpening.

IMMUTABLE CONSTRAINTS
- IDENTITY LOCK: never alter facial features, expression, skin texture, age or ethnicity. This is not a beauty filter.
- CONTENT LOCK: never change the outfit, its colors, its fit or any accessory.
- COMPOSITION LOCK: the background, the pose and the framing stay exactly as they are.

OUTPUT
A photographically superior version of the input with identical content and identity, as if shot with a better lens and sensor under professional lighting.";

pub fn build_enhance_request(image: &ImageAsset) -> GenerationRequest {
    GenerationRequest {
        kind: OperationKind::Enhance,
        attachments: vec![image.clone()],
        instructions: ENHANCE_INSTRUCTIONS.to_string(),
    }
}

const SUGGESTION_INSTRUCTIONS: &str = "\
ROLE: master stylist and fashion editor.

INPUT
1. IMAGE_0 is the person. Read their general aesthetic and personal style cues.
2. IMAGE_1 onwards is the outfit. Work out its style direction (minimalist, techwear, bohemian, formal, ...) along with its palette, materials and silhouette.

TASK
- Propose 3 to 5 short, specific accessory suggestions that elevate this exact outfit.
- Avoid generic advice such as \"add a necklace\". Prefer \"a delicate silver chain with a small geometric pendant\".
- Answer with a JSON object holding one key, \"suggestions\", whose value is an array of strings.
- Example: {\"suggestions\": [\"a minimalist silver chain\", \"classic black rectangular sunglasses\", \"a vintage leather-strap watch with a dark dial\"]}
- Output nothing except that JSON object.";

pub fn build_suggestion_request(base_image: &ImageAsset, garments: &[ImageAsset]) -> GenerationRequest {
    let mut attachments = Vec::with_capacity(1 + garments.len());
    attachments.push(base_image.clone());
    attachments.extend(garments.iter().cloned());
    GenerationRequest {
        kind: OperationKind::Suggest,
        attachments,
        instructions: SUGGESTION_INSTRUCTIONS.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use atelier_contracts::assets::{ImageAsset, MimeType};
    use atelier_contracts::requests::OperationKind;
    use atelier_contracts::selection::{BackgroundOption, FitOption, PoseOption};

    use super::{
        build_enhance_request, build_suggestion_request, build_try_on_request, fit_instruction,
        try_on_progress_label, TryOnInputs,
    };

    fn asset(tag: u8) -> ImageAsset {
        ImageAsset::new(vec![tag; 4], MimeType::Png)
    }

    fn inputs<'a>(base: &'a ImageAsset, garments: &'a [ImageAsset]) -> TryOnInputs<'a> {
        TryOnInputs {
            base_image: base,
            garments,
            pose: PoseOption::Original,
            custom_pose_text: "",
            fit: FitOption::Regular,
            background: BackgroundOption::Custom,
            background_text: "",
            custom_edit_text: "",
        }
    }

    #[test]
    fn subject_is_first_attachment_and_identity_lock_leads() {
        let base = asset(0);
        let garments = [asset(1), asset(2)];
        let request = build_try_on_request(&inputs(&base, &garments));
        assert_eq!(request.kind, OperationKind::Generate);
        assert_eq!(request.attachments, vec![asset(0), asset(1), asset(2)]);

        let lock = request.instructions.find("IDENTITY LOCK").unwrap_or(usize::MAX);
        let pose = request.instructions.find("APPLY POSE").unwrap_or(0);
        assert!(lock < pose);
        assert!(request.instructions.contains("Take every garment"));
    }

    #[test]
    fn builder_is_deterministic() {
        let base = asset(0);
        let garments = [asset(1)];
        let mut a = inputs(&base, &garments);
        a.custom_edit_text = "add a scarf";
        a.fit = FitOption::Baggy;
        let first = build_try_on_request(&a);
        let second = build_try_on_request(&a);
        assert_eq!(first.instructions, second.instructions);
        assert_eq!(first.attachments, second.attachments);
    }

    #[test]
    fn replicate_without_garment_matches_original_pose() {
        let base = asset(0);
        let mut replicate = inputs(&base, &[]);
        replicate.pose = PoseOption::Replicate;
        let original = inputs(&base, &[]);
        assert_eq!(
            build_try_on_request(&replicate).instructions,
            build_try_on_request(&original).instructions
        );

        let garments = [asset(1)];
        let mut with_garment = inputs(&base, &garments);
        with_garment.pose = PoseOption::Replicate;
        assert!(build_try_on_request(&with_garment)
            .instructions
            .contains("pose shown in IMAGE_1"));
    }

    #[test]
    fn custom_pose_without_text_matches_original_pose() {
        let base = asset(0);
        let mut custom = inputs(&base, &[]);
        custom.pose = PoseOption::Custom;
        custom.custom_pose_text = "   ";
        assert_eq!(
            build_try_on_request(&custom).instructions,
            build_try_on_request(&inputs(&base, &[])).instructions
        );
        custom.custom_pose_text = " arms crossed ";
        assert!(build_try_on_request(&custom)
            .instructions
            .contains("adopt this pose: \"arms crossed\""));
    }

    #[test]
    fn outfit_background_without_garment_matches_custom_empty() {
        let base = asset(0);
        let mut outfit = inputs(&base, &[]);
        outfit.background = BackgroundOption::Outfit;
        assert_eq!(
            build_try_on_request(&outfit).instructions,
            build_try_on_request(&inputs(&base, &[])).instructions
        );
    }

    #[test]
    fn outfit_background_with_garment_borrows_outfit_scene() {
        let base = asset(0);
        let garments = [asset(1)];
        let mut outfit = inputs(&base, &garments);
        outfit.background = BackgroundOption::Outfit;
        outfit.background_text = "ignored scene";
        let text = build_try_on_request(&outfit).instructions;
        assert!(text.contains(
            "Replace the background with the background from IMAGE_1. Composite the SUBJECT into it seamlessly"
        ));
        assert!(!text.contains("ignored scene"));
        assert!(!text.contains("Keep the original background"));
    }

    #[test]
    fn custom_background_text_replaces_scene() {
        let base = asset(0);
        let mut scene = inputs(&base, &[]);
        scene.background_text = "a serene beach at sunset";
        let text = build_try_on_request(&scene).instructions;
        assert!(text.contains("new, photorealistic scene: \"a serene beach at sunset\""));
        assert!(!text.contains("Keep the original background"));
    }

    #[test]
    fn fit_directive_present_without_garments() {
        let base = asset(0);
        let mut slim = inputs(&base, &[]);
        slim.fit = FitOption::Slim;
        let text = build_try_on_request(&slim).instructions;
        assert!(text.contains(fit_instruction(FitOption::Slim)));
        assert!(text.contains("Do not change the clothing"));
        assert!(text.contains("No other changes."));
    }

    #[test]
    fn has_changes_gate() {
        let base = asset(0);
        let garments = [asset(1)];
        assert!(!inputs(&base, &[]).has_changes());
        assert!(inputs(&base, &garments).has_changes());

        let mut pose_only = inputs(&base, &[]);
        pose_only.custom_pose_text = "jumping";
        assert!(!pose_only.has_changes());
        pose_only.pose = PoseOption::Custom;
        assert!(pose_only.has_changes());

        let mut outfit_only = inputs(&base, &[]);
        outfit_only.background = BackgroundOption::Outfit;
        assert!(!outfit_only.has_changes());
    }

    #[test]
    fn progress_labels_follow_priority() {
        let base = asset(0);
        let garments = [asset(1)];
        let mut all = inputs(&base, &garments);
        all.background_text = "beach";
        all.custom_edit_text = "hat";
        assert_eq!(try_on_progress_label(&all), "Simulating your new outfit...");

        let mut background = inputs(&base, &[]);
        background.background = BackgroundOption::Outfit;
        assert_eq!(
            try_on_progress_label(&background),
            "Compositing new background..."
        );

        let mut custom = inputs(&base, &[]);
        custom.custom_edit_text = "hat";
        assert_eq!(
            try_on_progress_label(&custom),
            "Executing custom refinements..."
        );
        assert_eq!(
            try_on_progress_label(&inputs(&base, &[])),
            "Generating your image..."
        );
    }

    #[test]
    fn enhance_and_suggestion_requests() {
        let enhance = build_enhance_request(&asset(5));
        assert_eq!(enhance.kind, OperationKind::Enhance);
        assert_eq!(enhance.attachments.len(), 1);
        assert!(enhance.instructions.contains("IDENTITY LOCK"));

        let suggest = build_suggestion_request(&asset(0), &[asset(1), asset(2)]);
        assert_eq!(suggest.kind, OperationKind::Suggest);
        assert_eq!(suggest.attachments.len(), 3);
        assert!(suggest.instructions.contains("\"suggestions\""));
    }
}
