#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::allocator::FixedSelector;
    use crate::error::AppError;
    use crate::learning;
    use crate::models::RenderedBlock;
    use crate::test::utils::{STUDENT, create_standard_test_db, rendered_choices};

    #[rocket::async_test]
    async fn test_start_visit_is_idempotent() {
        let test_db = create_standard_test_db().await;
        let module_id = test_db.module_id("Europe");

        let first = learning::start_visit(&test_db.pool, STUDENT, module_id)
            .await
            .unwrap();
        let second = learning::start_visit(&test_db.pool, STUDENT, module_id)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.block_index, 0);
    }

    #[rocket::async_test]
    async fn test_start_visit_unknown_module() {
        let test_db = create_standard_test_db().await;

        let result = learning::start_visit(&test_db.pool, STUDENT, 9999).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[rocket::async_test]
    async fn test_cannot_skip_ahead() {
        let test_db = create_standard_test_db().await;
        let module_id = test_db.module_id("Europe");
        let selector = FixedSelector(0);

        let result = learning::take_block(&test_db.pool, &selector, STUDENT, module_id, 2).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));

        let result = learning::take_block(&test_db.pool, &selector, STUDENT, module_id, 3).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let result = learning::take_block(&test_db.pool, &selector, STUDENT, module_id, -1).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[rocket::async_test]
    async fn test_question_gates_progress_and_frontier_never_moves_back() {
        let test_db = create_standard_test_db().await;
        let module_id = test_db.module_id("Europe");
        let pool = &test_db.pool;
        let selector = FixedSelector(0);

        let page = learning::take_block(pool, &selector, STUDENT, module_id, 0)
            .await
            .unwrap();
        assert_eq!(page.block_count, 3);

        let page = learning::take_block(pool, &selector, STUDENT, module_id, 1)
            .await
            .unwrap();
        assert_eq!(page.visit.block_index, 1);
        assert!(rendered_choices(&page.block).iter().all(|c| c.correct.is_none()));

        let result = learning::take_block(pool, &selector, STUDENT, module_id, 2).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let choice = rendered_choices(&page.block)[0].id;
        let page = learning::submit_answer(pool, &selector, STUDENT, module_id, 1, choice, Utc::now())
            .await
            .unwrap();
        match &page.block {
            RenderedBlock::Question {
                selected_choice_id,
                choices,
                ..
            } => {
                assert_eq!(*selected_choice_id, Some(choice));
                assert!(choices.iter().all(|c| c.correct.is_some()));
            }
            other => panic!("Unexpected block {:?}", other),
        }

        let page = learning::take_block(pool, &selector, STUDENT, module_id, 2)
            .await
            .unwrap();
        assert_eq!(page.visit.block_index, 2);

        let page = learning::take_block(pool, &selector, STUDENT, module_id, 0)
            .await
            .unwrap();
        assert_eq!(page.visit.block_index, 2);
        match page.block {
            RenderedBlock::Content { text, .. } => assert_eq!(text, "Welcome to Europe"),
            other => panic!("Unexpected block {:?}", other),
        }
    }

    #[rocket::async_test]
    async fn test_answer_can_be_changed() {
        let test_db = create_standard_test_db().await;
        let module_id = test_db.module_id("Europe");
        let pool = &test_db.pool;
        let selector = FixedSelector(0);

        learning::take_block(pool, &selector, STUDENT, module_id, 0)
            .await
            .unwrap();
        let page = learning::take_block(pool, &selector, STUDENT, module_id, 1)
            .await
            .unwrap();
        let choices: Vec<i64> = rendered_choices(&page.block).iter().map(|c| c.id).collect();

        learning::submit_answer(pool, &selector, STUDENT, module_id, 1, choices[0], Utc::now())
            .await
            .unwrap();
        let page =
            learning::submit_answer(pool, &selector, STUDENT, module_id, 1, choices[1], Utc::now())
                .await
                .unwrap();

        match page.block {
            RenderedBlock::Question {
                selected_choice_id, ..
            } => assert_eq!(selected_choice_id, Some(choices[1])),
            other => panic!("Unexpected block {:?}", other),
        }
    }

    #[rocket::async_test]
    async fn test_submit_answer_rejections() {
        let test_db = create_standard_test_db().await;
        let module_id = test_db.module_id("Europe");
        let pool = &test_db.pool;
        let selector = FixedSelector(0);

        let result = learning::submit_answer(pool, &selector, STUDENT, module_id, 1, 1, Utc::now()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        learning::take_block(pool, &selector, STUDENT, module_id, 0)
            .await
            .unwrap();

        let result = learning::submit_answer(pool, &selector, STUDENT, module_id, 1, 1, Utc::now()).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));

        let result = learning::submit_answer(pool, &selector, STUDENT, module_id, 0, 1, Utc::now()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let page = learning::take_block(pool, &selector, STUDENT, module_id, 1)
            .await
            .unwrap();
        let foreign_choice = rendered_choices(&page.block)
            .iter()
            .map(|c| c.id)
            .max()
            .unwrap()
            + 1;

        let result =
            learning::submit_answer(pool, &selector, STUDENT, module_id, 1, foreign_choice, Utc::now())
                .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
