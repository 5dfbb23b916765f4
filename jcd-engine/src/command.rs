use std::collections::HashMap;

use glam::Vec3;

use crate::errors::EngineError;
use crate::scene::Scene;

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse;
}

pub struct CommandContext<'a> {
    pub scene: &'a mut Scene,
}

pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(FocusSelectionCommand);
        bus.register(ClearSelectionCommand);
        bus.register(HideSelectionCommand);
        bus.register(ShowAllCommand);
        bus.register(TranslateSelectionCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

struct FocusSelectionCommand;

impl CommandHandler for FocusSelectionCommand {
    fn name(&self) -> &'static str {
        "focus_selection"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        context.scene.focus_on_selection();
        CommandResponse::ok("视口已聚焦当前选中实体")
    }
}

struct ClearSelectionCommand;

impl CommandHandler for ClearSelectionCommand {
    fn name(&self) -> &'static str {
        "clear_selection"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        context.scene.clear_selection();
        CommandResponse::ok("选中集已清空")
    }
}

struct HideSelectionCommand;

impl CommandHandler for HideSelectionCommand {
    fn name(&self) -> &'static str {
        "hide_selection"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let hidden = context.scene.hide_selection();
        CommandResponse::ok(format!("已隐藏 {hidden} 个实体"))
    }
}

struct ShowAllCommand;

impl CommandHandler for ShowAllCommand {
    fn name(&self) -> &'static str {
        "show_all"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let shown = context.scene.show_all();
        CommandResponse::ok(format!("已显示 {shown} 个隐藏实体"))
    }
}

/// `translate_selection x y z`：为选中实体追加平移变换。
struct TranslateSelectionCommand;

impl TranslateSelectionCommand {
    fn parse_offset(args: &[String]) -> Result<Vec3, EngineError> {
        let [x, y, z] = args else {
            return Err(EngineError::InvalidArgument(format!(
                "需要 3 个坐标分量，实际 {} 个",
                args.len()
            )));
        };
        let parse = |raw: &String| {
            raw.parse::<f32>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| EngineError::InvalidArgument(format!("无法解析坐标分量 {raw:?}")))
        };
        Ok(Vec3::new(parse(x)?, parse(y)?, parse(z)?))
    }
}

impl CommandHandler for TranslateSelectionCommand {
    fn name(&self) -> &'static str {
        "translate_selection"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        match Self::parse_offset(&request.args) {
            Ok(offset) => {
                let moved = context.scene.translate_selection(offset);
                CommandResponse::ok(format!("已平移 {moved} 个实体"))
            }
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::scene::tests::sample_scene;

    #[test]
    fn focus_and_clear_commands_work() {
        let (mut scene, [first, _, _]) = sample_scene();
        scene.select(first).unwrap();

        let bus = CommandBus::new();
        let mut context = CommandContext { scene: &mut scene };

        let response = bus.dispatch(&CommandRequest::new("focus_selection"), &mut context);
        assert!(response.success);
        assert_eq!(context.scene.viewport().center, Vec3::new(1.0, 0.5, 0.0));

        let response = bus.dispatch(&CommandRequest::new("clear_selection"), &mut context);
        assert!(response.success);
        assert_eq!(context.scene.selection_len(), 0);
    }

    #[test]
    fn visibility_commands_report_counts() {
        let (mut scene, [first, second, _]) = sample_scene();
        scene.select(first).unwrap();
        scene.select(second).unwrap();

        let bus = CommandBus::new();
        let mut context = CommandContext { scene: &mut scene };
        let response = bus.dispatch(&CommandRequest::new("hide_selection"), &mut context);
        assert_eq!(response.message.as_deref(), Some("已隐藏 2 个实体"));
        assert_eq!(context.scene.visible_entities().count(), 1);

        let response = bus.dispatch(&CommandRequest::new("show_all"), &mut context);
        assert_eq!(response.message.as_deref(), Some("已显示 2 个隐藏实体"));
    }

    #[test]
    fn translate_selection_parses_three_components() {
        let (mut scene, [first, _, _]) = sample_scene();
        scene.select(first).unwrap();

        let bus = CommandBus::new();
        let mut context = CommandContext { scene: &mut scene };
        let request = CommandRequest::with_args("translate_selection", ["1", "0", "-2.5"]);
        assert!(bus.dispatch(&request, &mut context).success);
        let moved = context.scene.entity(first).unwrap();
        assert_eq!(moved.transformed_points()[0], Vec3::new(1.0, 0.0, -2.5));

        let missing = CommandRequest::with_args("translate_selection", ["1", "2"]);
        assert!(!bus.dispatch(&missing, &mut context).success);
        let garbage = CommandRequest::with_args("translate_selection", ["1", "x", "2"]);
        assert!(!bus.dispatch(&garbage, &mut context).success);
    }

    #[test]
    fn unknown_command_fails() {
        let mut scene = Scene::new();
        let bus = CommandBus::new();
        let mut context = CommandContext { scene: &mut scene };
        let response = bus.dispatch(&CommandRequest::new("explode"), &mut context);
        assert!(!response.success);
        assert_eq!(bus.available_commands().count(), 5);
    }
}
