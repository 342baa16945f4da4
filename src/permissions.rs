use crate::input::InputError;

/// Check Input Monitoring permission (required for global chord events)
///
/// # Errors
/// Returns `PermissionDenied` if Input Monitoring is not granted (macOS only)
pub fn check_input_monitoring_permission() -> Result<(), InputError> {
    tracing::info!("checking input monitoring permission");

    #[cfg(target_os = "macos")]
    {
        use core_graphics::event::CGEvent;
        use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

        // HIDSystemState sources can only be created with Input Monitoring
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState).map_err(|()| {
            InputError::PermissionDenied(
                "enable in System Settings > Privacy & Security > Input Monitoring".to_owned(),
            )
        })?;

        CGEvent::new_keyboard_event(source, 0, true).map_err(|()| {
            InputError::PermissionDenied(
                "keyboard events restricted - check Input Monitoring settings".to_owned(),
            )
        })?;

        tracing::info!("input monitoring permission granted");
    }

    Ok(())
}

/// Log the microphone requirement
///
/// The OS prompts for microphone access on first device open; a refusal
/// surfaces as `DeviceUnavailable` from the capture session.
pub fn note_microphone_permission() {
    tracing::info!("microphone access is requested by the OS on first capture");
}
