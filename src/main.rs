#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    triage_api::rocket()
}
