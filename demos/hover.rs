use nalgebra::Vector3;
use uav_cascade::control::run_closed_loop;
use uav_cascade::reference::ConstantReference;
use uav_cascade::{CascadedController, ControllerConfig, Model, VehicleState};

const CONFIG: &str = r#"
thrust_policy = "project_z"
rotation_metric = "euler_zyx"

[gains]
kpos = [6.0, 6.0, 6.0]
kvel = [4.0, 4.0, 4.0]
krot = [120.0, 120.0, 30.0]
kang = [16.0, 16.0, 10.0]
"#;

// Recover a hover setpoint from a displaced, yawed start.
fn main() {
    let model = Model::diagonal(2.0, 9.81, 0.1, 0.1, 0.2).expect("valid model");
    let config = ControllerConfig::from_toml_str(CONFIG).expect("valid config");

    let reference = ConstantReference::new(Vector3::new(0.0, 0.0, 1.0), 0.5);
    let mut controller = CascadedController::from_config(model, &reference, &config);

    let initial_state = VehicleState::at_rest(Vector3::new(1.0, -0.5, 0.2));

    let dt = 1. / 200.;
    let result = run_closed_loop(
        &mut controller,
        &model,
        &initial_state,
        (0.0, 5.0),
        dt,
        |t, state, command| {
            if (t / dt).round() as usize % 20 == 0 {
                println!(
                    "{:.2} pos ({:.3}, {:.3}, {:.3}) thrust {:.3} torque ({:.4}, {:.4}, {:.4})",
                    t,
                    state.position.x,
                    state.position.y,
                    state.position.z,
                    command.thrust,
                    command.torque.x,
                    command.torque.y,
                    command.torque.z
                );
            }
        },
    );

    match result {
        Ok(final_state) => {
            let (roll, pitch, yaw) = final_state.orientation.euler_angles();
            println!("Final state:");
            println!(
                "Position: ({:.3}, {:.3}, {:.3})",
                final_state.position.x, final_state.position.y, final_state.position.z
            );
            println!("Attitude: ({:.3}, {:.3}, {:.3})", roll, pitch, yaw);
        }
        Err(e) => println!("Simulation failed: {}", e),
    }
}
