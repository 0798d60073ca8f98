use nalgebra::{Matrix3, Vector3};
use uav_cascade::control::run_closed_loop;
use uav_cascade::learning::LinearLearner;
use uav_cascade::reference::CircleReference;
use uav_cascade::{LearningCascadedController, Model, Reference, VehicleState};

// Crazyflie tracking a 1 m circle with a yawing heading, while a learned
// drag-like error term is compensated and every command is recorded.
fn main() {
    let model = Model::crazyflie();

    let reference = CircleReference::new(Vector3::new(0.0, 0.0, 1.0), 1.0, 1.2).with_yaw(0.0, 0.3);
    let drag = Matrix3::from_diagonal(&Vector3::new(-0.1, -0.1, 0.0));
    let learner = LinearLearner::new(Vector3::zeros(), Matrix3::zeros(), drag);
    let mut controller = LearningCascadedController::new(model, &reference, learner);

    let initial_state = VehicleState {
        position: reference.pos(0.0),
        velocity: reference.vel(0.0),
        ..Default::default()
    };

    let dt = 1. / 500.;
    let simulation_span = 10.0;
    let result = run_closed_loop(
        &mut controller,
        &model,
        &initial_state,
        (0.0, simulation_span),
        dt,
        |t, state, _| {
            if (t / dt).round() as usize % 50 == 0 {
                let error = state.position - reference.pos(t);
                println!(
                    "{:.2} {:.4} {:.4} {:.4} err {:.5}",
                    t,
                    state.position.x,
                    state.position.y,
                    state.position.z,
                    error.norm()
                );
            }
        },
    );

    match result {
        Ok(final_state) => {
            let error = final_state.position - reference.pos(simulation_span);
            println!("final tracking error {:.5} m", error.norm());
            println!("recorded {} datapoints", controller.learner().datapoints().len());
        }
        Err(e) => println!("Simulation failed: {}", e),
    }
}
