#[cfg(test)]
pub mod test_db {
    use crate::auth::{Role, User};
    use crate::database::migrate_database;
    use crate::db::{NewUser, create_user, get_user};
    use crate::error::AppError;
    use crate::repository::{
        NewBatch, NewCenter, NewStudent, create_batch, create_center, create_student,
    };
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        centers: Vec<String>,
        users: Vec<TestUser>,
        batches: Vec<TestBatch>,
        students: Vec<TestStudent>,
    }

    pub struct TestUser {
        pub email: String,
        pub full_name: String,
        pub role: Role,
        pub center: Option<String>,
    }

    pub struct TestBatch {
        pub name: String,
        pub center: String,
        pub coach_email: Option<String>,
    }

    pub struct TestStudent {
        pub full_name: String,
        pub batch: String,
    }

    /// Acts for the fixture itself; never stored in the database.
    fn fixture_admin() -> User {
        User {
            id: 0,
            email: "fixture@academy.test".to_string(),
            full_name: "Fixture".to_string(),
            role: Role::SuperAdmin,
            center_id: None,
        }
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn center(mut self, name: &str) -> Self {
            self.centers.push(name.to_string());
            self
        }

        pub fn user(mut self, email: &str, role: Role, center: Option<&str>) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                full_name: email.split('@').next().unwrap_or(email).to_string(),
                role,
                center: center.map(String::from),
            });
            self
        }

        pub fn batch(mut self, name: &str, center: &str, coach_email: Option<&str>) -> Self {
            self.batches.push(TestBatch {
                name: name.to_string(),
                center: center.to_string(),
                coach_email: coach_email.map(String::from),
            });
            self
        }

        pub fn student(mut self, full_name: &str, batch: &str) -> Self {
            self.students.push(TestStudent {
                full_name: full_name.to_string(),
                batch: batch.to_string(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .parse_filters("debug")
                    .is_test(true)
                    .try_init();
            });

            // Every connection to `sqlite::memory:` is a new database, so the
            // pool is pinned to one connection that never expires.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;

            migrate_database(&pool).await?;

            let admin = fixture_admin();
            let mut center_ids = HashMap::new();
            let mut user_ids = HashMap::new();
            let mut batch_ids = HashMap::new();
            let mut student_ids = HashMap::new();

            for name in &self.centers {
                let center = create_center(
                    &pool,
                    &admin,
                    &NewCenter {
                        name: name.clone(),
                        location: format!("{} ground", name),
                    },
                )
                .await?;
                center_ids.insert(name.clone(), center.id);
            }

            for user in &self.users {
                let center_id = match &user.center {
                    Some(name) => Some(lookup(&center_ids, name)?),
                    None => None,
                };

                let id = create_user(
                    &pool,
                    &NewUser {
                        email: &user.email,
                        password: STANDARD_PASSWORD,
                        full_name: &user.full_name,
                        role: user.role,
                        center_id,
                    },
                )
                .await?;
                user_ids.insert(user.email.clone(), id);
            }

            for batch in &self.batches {
                let coach_id = match &batch.coach_email {
                    Some(email) => Some(lookup(&user_ids, email)?),
                    None => None,
                };

                let created = create_batch(
                    &pool,
                    &admin,
                    &NewBatch {
                        name: batch.name.clone(),
                        center_id: lookup(&center_ids, &batch.center)?,
                        coach_id,
                        start_time: None,
                        end_time: None,
                    },
                )
                .await?;
                batch_ids.insert(batch.name.clone(), created.id);
            }

            for student in &self.students {
                let created = create_student(
                    &pool,
                    &admin,
                    &NewStudent {
                        full_name: student.full_name.clone(),
                        age: 12,
                        batch_id: lookup(&batch_ids, &student.batch)?,
                        parent_name: format!("Parent of {}", student.full_name),
                        parent_phone: Some("+91 98765 43210".to_string()),
                    },
                )
                .await?;
                student_ids.insert(student.full_name.clone(), created.id);
            }

            Ok(TestDb {
                pool,
                center_ids,
                user_ids,
                batch_ids,
                student_ids,
            })
        }
    }

    fn lookup(ids: &HashMap<String, i64>, name: &str) -> Result<i64, AppError> {
        ids.get(name)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("fixture entry '{}' not declared", name)))
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub center_ids: HashMap<String, i64>,
        pub user_ids: HashMap<String, i64>,
        pub batch_ids: HashMap<String, i64>,
        pub student_ids: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn center_id(&self, name: &str) -> i64 {
            self.center_ids[name]
        }

        pub fn user_id(&self, email: &str) -> i64 {
            self.user_ids[email]
        }

        pub fn batch_id(&self, name: &str) -> i64 {
            self.batch_ids[name]
        }

        pub fn student_id(&self, full_name: &str) -> i64 {
            self.student_ids[full_name]
        }

        pub async fn user(&self, email: &str) -> User {
            get_user(&self.pool, self.user_id(email))
                .await
                .expect("Fixture user should load")
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use crate::auth::Role;
    use crate::env::AppConfig;
    use crate::init_rocket;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    pub use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};

    pub const ADMIN: &str = "admin@academy.test";
    pub const CLUB_MANAGER: &str = "club.manager@academy.test";
    pub const HEAD_COACH: &str = "head.coach@academy.test";
    pub const NORTH_MANAGER: &str = "north.manager@academy.test";
    pub const NORTH_COACH: &str = "north.coach@academy.test";
    pub const SOUTH_COACH: &str = "south.coach@academy.test";

    /// Two centers, one batch each. North has four students, South has two.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .center("North")
            .center("South")
            .user(ADMIN, Role::SuperAdmin, None)
            .user(CLUB_MANAGER, Role::ClubManager, None)
            .user(HEAD_COACH, Role::HeadCoach, None)
            .user(NORTH_MANAGER, Role::CenterManager, Some("North"))
            .user(NORTH_COACH, Role::Coach, Some("North"))
            .user(SOUTH_COACH, Role::Coach, Some("South"))
            .batch("North Morning", "North", Some(NORTH_COACH))
            .batch("South Evening", "South", Some(SOUTH_COACH))
            .student("Asha", "North Morning")
            .student("Bilal", "North Morning")
            .student("Chen", "North Morning")
            .student("Dev", "North Morning")
            .student("Esha", "South Evening")
            .student("Farid", "South Evening")
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), AppConfig::default()).await;
        let client = Client::tracked(rocket)
            .await
            .expect("valid rocket instance");
        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, email: &str) {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": email,
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
    }
}
